use crate::changes;
use serde::Deserialize;

/// Where the stack lives on a target.
pub const INSTALL_DIR: &str = "/opt/meshforge";
/// Where the uploaded source archive lands before a script consumes it.
pub const ARCHIVE_REMOTE_PATH: &str = "/tmp/meshforge.tar.gz";
/// Compose manifest, relative to INSTALL_DIR.
pub const COMPOSE_FILE: &str = "deployments/docker/docker-compose.yml";
/// Firewall baseline shipped inside the archive, relative to INSTALL_DIR.
pub const FIREWALL_SCRIPT: &str = "deployments/scripts/firewall.sh";
/// Reserved management tunnel interface.
pub const ADMIN_IFACE: &str = "wg-admin";
/// Mesh data-plane interface.
pub const MESH_IFACE: &str = "wg0";

/// Delimiters for the machine-readable secrets block a script prints once.
pub const SECRETS_BEGIN: &str = "@@MESHFORGE_SECRETS_BEGIN@@";
pub const SECRETS_END: &str = "@@MESHFORGE_SECRETS_END@@";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Install,
    Reinstall,
    Update,
    Migrate,
    Uninstall,
}

impl Action {
    /// Name used in history entries and log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Install => "install",
            Action::Reinstall => "reinstall",
            Action::Update => "update",
            Action::Migrate => "migrate",
            Action::Uninstall => "uninstall",
        }
    }

    /// Whether this action consumes an uploaded source archive.
    pub fn needs_archive(&self) -> bool {
        matches!(self, Action::Install | Action::Reinstall | Action::Update)
    }
}

/// Caller-supplied deployment parameters. Empty fields mean "generate a
/// secret on the target". Never persisted; the rendered script text is the
/// only place these values travel.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptConfig {
    #[serde(default)]
    pub admin_username: Option<String>,
    #[serde(default)]
    pub admin_password: Option<String>,
    /// Public endpoint override; auto-detected on the target when empty.
    #[serde(default)]
    pub vpn_address: Option<String>,
    #[serde(default)]
    pub db_name: Option<String>,
    #[serde(default)]
    pub db_user: Option<String>,
    #[serde(default)]
    pub db_password: Option<String>,
}

/// Single-quote a value for safe interpolation into shell text.
/// `it's` becomes `'it'\''s'`; the empty string stays a quoted empty string.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Renders the deployment scripts. One builder per service instance; the
/// non-interactive flag comes from the environment, not the caller.
pub struct ScriptBuilder {
    pub apt_noninteractive: bool,
}

impl ScriptBuilder {
    pub fn new(apt_noninteractive: bool) -> Self {
        Self { apt_noninteractive }
    }

    pub fn build(&self, action: Action, config: &ScriptConfig) -> String {
        match action {
            Action::Install => self.install_script(config),
            Action::Reinstall => self.reinstall_script(config),
            Action::Update => self.update_script(),
            Action::Migrate => self.migrate_script(),
            Action::Uninstall => self.uninstall_script(),
        }
    }

    fn prelude(&self, strict: bool) -> String {
        let mut s = String::from("#!/bin/bash\n");
        if strict {
            s.push_str("set -e\n");
        }
        if self.apt_noninteractive {
            s.push_str("export DEBIAN_FRONTEND=noninteractive\n");
        }
        s.push_str(&format!("INSTALL_DIR={}\n", shell_quote(INSTALL_DIR)));
        s.push_str(&format!(
            "COMPOSE=\"docker-compose -f $INSTALL_DIR/{}\"\n",
            COMPOSE_FILE
        ));
        s
    }

    fn config_vars(&self, c: &ScriptConfig) -> String {
        let get = |v: &Option<String>| shell_quote(v.as_deref().unwrap_or(""));
        format!(
            r#"ADMIN_USERNAME={admin_user}
ADMIN_PASSWORD={admin_pass}
ENDPOINT_OVERRIDE={endpoint}
DB_NAME={db_name}
DB_USER={db_user}
DB_PASSWORD={db_pass}
[ -n "$ADMIN_USERNAME" ] || ADMIN_USERNAME=admin
[ -n "$DB_NAME" ] || DB_NAME=meshforge
[ -n "$DB_USER" ] || DB_USER=meshforge
"#,
            admin_user = get(&c.admin_username),
            admin_pass = get(&c.admin_password),
            endpoint = get(&c.vpn_address),
            db_name = get(&c.db_name),
            db_user = get(&c.db_user),
            db_pass = get(&c.db_password),
        )
    }

    fn install_script(&self, config: &ScriptConfig) -> String {
        let mut s = self.prelude(true);
        s.push_str(LOG_HELPERS);
        s.push_str(&self.config_vars(config));
        s.push_str(&format!(
            r#"
echo "=========================================="
echo "  meshforge node installer"
echo "=========================================="

log_info "Updating package cache..."
apt-get update -qq

if ! command -v docker >/dev/null 2>&1; then
  log_info "Installing Docker..."
  curl -fsSL https://get.docker.com | sh
else
  log_info "Docker already installed"
fi

if ! command -v docker-compose >/dev/null 2>&1; then
  log_info "Installing Docker Compose..."
  apt-get install -y docker-compose
else
  log_info "Docker Compose already installed"
fi

if ! command -v wg >/dev/null 2>&1; then
  log_info "Installing WireGuard..."
  apt-get install -y wireguard wireguard-tools
fi

log_info "Extracting archive..."
mkdir -p "$INSTALL_DIR"
tar -xzf {archive} -C "$INSTALL_DIR"
rm -f {archive}

log_info "Generating secrets..."
{generate_secret}
API_KEY=$(generate_secret)
JWT_SECRET=$(generate_secret)
TURN_SECRET=$(generate_secret)
[ -n "$DB_PASSWORD" ] || DB_PASSWORD=$(generate_secret)
[ -n "$ADMIN_PASSWORD" ] || ADMIN_PASSWORD=$(generate_secret)

SERVER_IP="$ENDPOINT_OVERRIDE"
if [ -z "$SERVER_IP" ]; then
  log_info "Detecting public IP..."
  SERVER_IP=$(curl -s -4 ifconfig.me 2>/dev/null || curl -s -4 icanhazip.com 2>/dev/null || hostname -I | awk '{{print $1}}')
fi
log_info "Endpoint: $SERVER_IP"

# Management tunnel and firewall come up before anything listens publicly.
log_info "Bootstrapping admin VPN ({admin_iface})..."
wg-quick down {admin_iface} 2>/dev/null || true
rm -f /etc/wireguard/{admin_iface}.conf
ADMIN_SERVER_KEY=$(wg genkey)
ADMIN_SERVER_PUB=$(echo "$ADMIN_SERVER_KEY" | wg pubkey)
ADMIN_CLIENT_KEY=$(wg genkey)
ADMIN_CLIENT_PUB=$(echo "$ADMIN_CLIENT_KEY" | wg pubkey)

cat <<EOF > /etc/wireguard/{admin_iface}.conf
[Interface]
PrivateKey = $ADMIN_SERVER_KEY
Address = {admin_server_addr}
ListenPort = {admin_port}

[Peer]
PublicKey = $ADMIN_CLIENT_PUB
AllowedIPs = {admin_client_ip}/32
EOF
chmod 600 /etc/wireguard/{admin_iface}.conf
systemctl enable --now wg-quick@{admin_iface}

log_info "Applying firewall baseline..."
bash "$INSTALL_DIR/{firewall}"

log_info "Writing environment..."
cat <<EOF > "$INSTALL_DIR/deployments/docker/.env"
DB_NAME=$DB_NAME
DB_USER=$DB_USER
DB_PASSWORD=$DB_PASSWORD
JWT_SECRET=$JWT_SECRET
TURN_SECRET=$TURN_SECRET
API_KEY=$API_KEY
ADMIN_USERNAME=$ADMIN_USERNAME
ADMIN_PASSWORD=$ADMIN_PASSWORD
WG_SERVER_ENDPOINT=$SERVER_IP
EOF

log_info "Starting services..."
cd "$INSTALL_DIR"
$COMPOSE up -d --build

log_info "Waiting for services to settle..."
sleep 30
$COMPOSE exec -T {server_service} ./meshforge-server init --name default-network --cidr 10.10.0.0/16 2>&1 || true

echo ""
echo "=========================================="
echo "  INSTALLATION COMPLETE"
echo "=========================================="
echo "Dashboard: http://{admin_client_gw}:8080 (over {admin_iface})"
echo ""
echo "---------- ADMIN VPN CLIENT CONFIG ----------"
cat <<EOF
[Interface]
PrivateKey = $ADMIN_CLIENT_KEY
Address = {admin_client_ip}/32

[Peer]
PublicKey = $ADMIN_SERVER_PUB
Endpoint = $SERVER_IP:{admin_port}
AllowedIPs = {admin_net}
PersistentKeepalive = 25
EOF
echo "---------- END ADMIN VPN CLIENT CONFIG ----------"
echo ""
echo "{secrets_begin}"
echo "API_KEY=$API_KEY"
echo "JWT_SECRET=$JWT_SECRET"
echo "TURN_SECRET=$TURN_SECRET"
echo "DB_PASSWORD=$DB_PASSWORD"
echo "ADMIN_USERNAME=$ADMIN_USERNAME"
echo "ADMIN_PASSWORD=$ADMIN_PASSWORD"
echo "DASHBOARD_URL=http://$SERVER_IP:8080"
echo "{secrets_end}"
docker ps --format "table {{{{.Names}}}}\t{{{{.Status}}}}\t{{{{.Ports}}}}" | grep meshforge || true
"#,
            archive = ARCHIVE_REMOTE_PATH,
            generate_secret = GENERATE_SECRET_FN,
            admin_iface = ADMIN_IFACE,
            admin_server_addr = ADMIN_VPN_SERVER_ADDR,
            admin_client_ip = ADMIN_VPN_CLIENT_IP,
            admin_client_gw = ADMIN_VPN_SERVER_IP,
            admin_net = ADMIN_VPN_NET,
            admin_port = ADMIN_VPN_PORT,
            firewall = FIREWALL_SCRIPT,
            server_service = changes::SERVER_SERVICE,
            secrets_begin = SECRETS_BEGIN,
            secrets_end = SECRETS_END,
        ));
        s
    }

    fn reinstall_script(&self, config: &ScriptConfig) -> String {
        let mut s = self.prelude(true);
        s.push_str(LOG_HELPERS);
        s.push_str(&self.config_vars(config));
        s.push_str(&format!(
            r#"
echo "=========================================="
echo "  meshforge REINSTALL"
echo "=========================================="

ENV_FILE="$INSTALL_DIR/deployments/docker/.env"
ENV_BAK=/tmp/meshforge.env.bak
if [ -f "$ENV_FILE" ]; then
  log_info "Preserving existing environment..."
  cp "$ENV_FILE" "$ENV_BAK"
fi

# Keep volumes: down without -v
if [ -f "$INSTALL_DIR/{compose}" ]; then
  cd "$INSTALL_DIR"
  $COMPOSE down --rmi local 2>/dev/null || true
fi

if [ -d "$INSTALL_DIR" ]; then
  log_info "Cleaning files (data/ preserved)..."
  find "$INSTALL_DIR" -mindepth 1 -maxdepth 1 ! -name data -exec rm -rf {{}} +
fi

mkdir -p "$INSTALL_DIR"
tar -xzf {archive} -C "$INSTALL_DIR"
rm -f {archive}
cd "$INSTALL_DIR"

NEW_SECRETS=0
if [ -f "$ENV_BAK" ]; then
  log_info "Restoring environment..."
  mv "$ENV_BAK" "$ENV_FILE"
  if ! grep -q "^WG_SERVER_ENDPOINT=" "$ENV_FILE"; then
    SERVER_IP="$ENDPOINT_OVERRIDE"
    [ -n "$SERVER_IP" ] || SERVER_IP=$(curl -s -4 ifconfig.me 2>/dev/null || curl -s -4 icanhazip.com 2>/dev/null || hostname -I | awk '{{print $1}}')
    echo "WG_SERVER_ENDPOINT=$SERVER_IP" >> "$ENV_FILE"
    log_info "WG_SERVER_ENDPOINT added: $SERVER_IP"
  fi
else
  log_info "No previous environment, generating secrets..."
  NEW_SECRETS=1
  {generate_secret}
  API_KEY=$(generate_secret)
  JWT_SECRET=$(generate_secret)
  TURN_SECRET=$(generate_secret)
  [ -n "$DB_PASSWORD" ] || DB_PASSWORD=$(generate_secret)
  [ -n "$ADMIN_PASSWORD" ] || ADMIN_PASSWORD=$(generate_secret)
  SERVER_IP="$ENDPOINT_OVERRIDE"
  [ -n "$SERVER_IP" ] || SERVER_IP=$(curl -s -4 ifconfig.me 2>/dev/null || curl -s -4 icanhazip.com 2>/dev/null || hostname -I | awk '{{print $1}}')
  cat <<EOF > "$ENV_FILE"
DB_NAME=$DB_NAME
DB_USER=$DB_USER
DB_PASSWORD=$DB_PASSWORD
JWT_SECRET=$JWT_SECRET
TURN_SECRET=$TURN_SECRET
API_KEY=$API_KEY
ADMIN_USERNAME=$ADMIN_USERNAME
ADMIN_PASSWORD=$ADMIN_PASSWORD
WG_SERVER_ENDPOINT=$SERVER_IP
EOF
fi

$COMPOSE up -d --build
sleep 30
$COMPOSE exec -T {server_service} ./meshforge-server init --name default-network --cidr 10.10.0.0/16 2>&1 || true

if [ "$NEW_SECRETS" = "1" ]; then
  echo "{secrets_begin}"
  echo "API_KEY=$API_KEY"
  echo "JWT_SECRET=$JWT_SECRET"
  echo "TURN_SECRET=$TURN_SECRET"
  echo "DB_PASSWORD=$DB_PASSWORD"
  echo "ADMIN_USERNAME=$ADMIN_USERNAME"
  echo "ADMIN_PASSWORD=$ADMIN_PASSWORD"
  echo "DASHBOARD_URL=http://$SERVER_IP:8080"
  echo "{secrets_end}"
fi

echo "REINSTALL COMPLETE"
docker ps --format "table {{{{.Names}}}}\t{{{{.Status}}}}" | grep meshforge || true
"#,
            compose = COMPOSE_FILE,
            archive = ARCHIVE_REMOTE_PATH,
            generate_secret = GENERATE_SECRET_FN,
            server_service = changes::SERVER_SERVICE,
            secrets_begin = SECRETS_BEGIN,
            secrets_end = SECRETS_END,
        ));
        s
    }

    fn update_script(&self) -> String {
        let mut s = self.prelude(true);
        s.push_str(LOG_HELPERS);
        s.push_str(&format!(
            r#"
TEMP_DIR=/tmp/meshforge_update

echo "=========================================="
echo "  meshforge UPDATE"
echo "  env and data/ preserved"
echo "=========================================="

log_info "[1/4] Extracting new tree..."
rm -rf "$TEMP_DIR"
mkdir -p "$TEMP_DIR"
tar -xzf {archive} -C "$TEMP_DIR"
rm -f {archive}

log_info "[2/4] Detecting changes..."
# Secrets, persisted data and logs never count as changes.
dir_changed() {{
  [ -d "$1" ] || return 1
  # A subtree the install never had counts as changed, not absent
  [ -d "$2" ] || return 0
  ! diff -rq --exclude='.env' --exclude='data' --exclude='*.log' "$1" "$2" >/dev/null 2>&1
}}
file_changed() {{
  [ -f "$1" ] || return 1
  [ -f "$2" ] || return 0
  ! cmp -s "$1" "$2"
}}

SERVER_CHANGED=0
WEB_CHANGED=0
MANIFEST_CHANGED=0
dir_changed "$TEMP_DIR/server" "$INSTALL_DIR/server" && SERVER_CHANGED=1
dir_changed "$TEMP_DIR/web" "$INSTALL_DIR/web" && WEB_CHANGED=1
file_changed "$TEMP_DIR/{compose}" "$INSTALL_DIR/{compose}" && MANIFEST_CHANGED=1
# A Dockerfile edit means that service's image is stale even if its code is not.
file_changed "$TEMP_DIR/deployments/docker/Dockerfile.{server_service}" "$INSTALL_DIR/deployments/docker/Dockerfile.{server_service}" && SERVER_CHANGED=1
file_changed "$TEMP_DIR/deployments/docker/Dockerfile.{web_service}" "$INSTALL_DIR/deployments/docker/Dockerfile.{web_service}" && WEB_CHANGED=1
echo "server=$SERVER_CHANGED web=$WEB_CHANGED manifest=$MANIFEST_CHANGED"

if [ "${{SERVER_CHANGED}}${{WEB_CHANGED}}${{MANIFEST_CHANGED}}" = "000" ]; then
  log_info "No changes detected. Containers left untouched."
  rm -rf "$TEMP_DIR"
  exit 0
fi

log_info "[3/4] Syncing tree..."
if command -v rsync >/dev/null 2>&1; then
  rsync -a --delete \
    --exclude='.env' \
    --exclude='deployments/docker/.env' \
    --exclude='data/' \
    --exclude='*.log' \
    "$TEMP_DIR/" "$INSTALL_DIR/"
else
  log_warn "rsync not found, falling back to cp"
  if [ -f "$INSTALL_DIR/deployments/docker/.env" ]; then
    cp "$INSTALL_DIR/deployments/docker/.env" /tmp/meshforge.env.bak
  fi
  find "$TEMP_DIR" -mindepth 1 -maxdepth 1 ! -name data -exec cp -r {{}} "$INSTALL_DIR/" \;
  if [ -f /tmp/meshforge.env.bak ]; then
    mv /tmp/meshforge.env.bak "$INSTALL_DIR/deployments/docker/.env"
  fi
fi
rm -rf "$TEMP_DIR"

log_info "[4/4] Rebuilding affected services..."
cd "$INSTALL_DIR"

full_rebuild() {{
  $COMPOSE down --remove-orphans 2>/dev/null || true
  $COMPOSE up -d --build --remove-orphans
}}
rebuild_service() {{
  $COMPOSE stop "$1" 2>/dev/null || true
  $COMPOSE rm -f "$1" 2>/dev/null || true
  $COMPOSE build "$1"
  $COMPOSE up -d --no-deps "$1"
}}
apply_firewall() {{
  log_info "Re-applying firewall baseline..."
  bash "$INSTALL_DIR/{firewall}"
}}
run_migration() {{
  log_info "Running database migrations..."
  sleep 5
  $COMPOSE exec -T {server_service} ./meshforge-server migrate 2>&1 || echo "Migration skipped or not needed"
}}

{dispatch}
echo ""
echo "UPDATE COMPLETE"
docker ps --format "table {{{{.Names}}}}\t{{{{.Status}}}}" | grep meshforge || true
"#,
            archive = ARCHIVE_REMOTE_PATH,
            compose = COMPOSE_FILE,
            firewall = FIREWALL_SCRIPT,
            server_service = changes::SERVER_SERVICE,
            web_service = changes::WEB_SERVICE,
            dispatch = changes::render_dispatch(),
        ));
        s
    }

    fn migrate_script(&self) -> String {
        let mut s = self.prelude(true);
        s.push_str(&format!(
            r#"
echo "=========================================="
echo "  meshforge DATABASE MIGRATION"
echo "  files untouched"
echo "=========================================="

cd "$INSTALL_DIR"
$COMPOSE exec -T {server_service} ./meshforge-server migrate
echo "Database migration finished."
"#,
            server_service = changes::SERVER_SERVICE,
        ));
        s
    }

    // Deliberately no `set -e`: teardown keeps going past individual failures.
    fn uninstall_script(&self) -> String {
        let mut s = self.prelude(false);
        s.push_str(&format!(
            r#"
echo "=========================================="
echo "  meshforge UNINSTALL"
echo "=========================================="

cd "$INSTALL_DIR" 2>/dev/null || true

if [ -f "$INSTALL_DIR/{compose}" ]; then
  $COMPOSE down -v --rmi local 2>/dev/null || true
fi

# Name-filtered sweep in case the compose file is already gone
docker ps -a --filter name=meshforge -q | xargs -r docker rm -f 2>/dev/null || true
docker images --filter reference='meshforge*' -q | xargs -r docker rmi -f 2>/dev/null || true
docker volume ls -q --filter name=meshforge | xargs -r docker volume rm -f 2>/dev/null || true

# Tear down both tunnel interfaces
wg-quick down {admin_iface} 2>/dev/null || true
systemctl disable wg-quick@{admin_iface} 2>/dev/null || true
rm -f /etc/wireguard/{admin_iface}.conf
wg-quick down {mesh_iface} 2>/dev/null || true
systemctl disable wg-quick@{mesh_iface} 2>/dev/null || true
rm -f /etc/wireguard/{mesh_iface}.conf

# Firewall back to default-accept
iptables -P INPUT ACCEPT
iptables -P FORWARD ACCEPT
iptables -P OUTPUT ACCEPT
iptables -F
iptables -t nat -F
iptables -t mangle -F
iptables -X 2>/dev/null || true

rm -rf "$INSTALL_DIR"

echo ""
echo "meshforge completely removed."
"#,
            compose = COMPOSE_FILE,
            admin_iface = ADMIN_IFACE,
            mesh_iface = MESH_IFACE,
        ));
        s
    }
}

/// Admin VPN addressing. One server, exactly one client peer.
pub const ADMIN_VPN_NET: &str = "10.88.0.0/24";
pub const ADMIN_VPN_SERVER_ADDR: &str = "10.88.0.1/24";
pub const ADMIN_VPN_SERVER_IP: &str = "10.88.0.1";
pub const ADMIN_VPN_CLIENT_IP: &str = "10.88.0.2";
pub const ADMIN_VPN_PORT: u16 = 51821;

const LOG_HELPERS: &str = r#"
RED='\033[0;31m'
GREEN='\033[0;32m'
YELLOW='\033[1;33m'
NC='\033[0m'
log_info() { echo -e "${GREEN}[INFO]${NC} $1"; }
log_warn() { echo -e "${YELLOW}[WARN]${NC} $1"; }
log_error() { echo -e "${RED}[ERROR]${NC} $1"; }
"#;

const GENERATE_SECRET_FN: &str = r#"generate_secret() {
  openssl rand -hex 16 2>/dev/null || head -c 16 /dev/urandom | od -An -t x1 | tr -d ' \n'
}"#;
