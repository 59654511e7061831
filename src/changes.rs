/// Compose service running the backend.
pub const SERVER_SERVICE: &str = "control-plane";
/// Compose service running the dashboard frontend.
pub const WEB_SERVICE: &str = "web";

/// Outcome of the remote three-way tree diff on update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeSet {
    pub server: bool,
    pub web: bool,
    pub manifest: bool,
}

impl ChangeSet {
    pub fn any(&self) -> bool {
        self.server || self.web || self.manifest
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rebuild {
    /// Nothing changed: leave running containers alone.
    Nothing,
    /// Rebuild and recreate only these services.
    Services(Vec<&'static str>),
    /// Manifest changed: stop, rebuild, and recreate the whole stack.
    FullStack,
}

/// What an update actually has to do, derived from the change flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildPlan {
    pub rebuild: Rebuild,
    pub run_migration: bool,
    pub reapply_firewall: bool,
}

impl RebuildPlan {
    pub fn for_changes(c: ChangeSet) -> Self {
        let rebuild = if c.manifest {
            Rebuild::FullStack
        } else if c.server && c.web {
            Rebuild::Services(vec![SERVER_SERVICE, WEB_SERVICE])
        } else if c.server {
            Rebuild::Services(vec![SERVER_SERVICE])
        } else if c.web {
            Rebuild::Services(vec![WEB_SERVICE])
        } else {
            Rebuild::Nothing
        };

        RebuildPlan {
            rebuild,
            // Schema migrations ride along with backend code only
            run_migration: c.server,
            reapply_firewall: c.server || c.manifest,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.rebuild == Rebuild::Nothing
    }
}

/// Render the update script's dispatch as a shell `case` over the three
/// change flags. Every arm is generated from `RebuildPlan::for_changes`,
/// so the shell and the Rust table cannot drift apart. The script is
/// expected to define `full_rebuild`, `rebuild_service`, `apply_firewall`
/// and `run_migration` and to set SERVER_CHANGED/WEB_CHANGED/MANIFEST_CHANGED
/// to 0 or 1 before dispatching.
pub fn render_dispatch() -> String {
    let mut out = String::from("case \"${SERVER_CHANGED}${WEB_CHANGED}${MANIFEST_CHANGED}\" in\n");

    for bits in 0..8u8 {
        let c = ChangeSet {
            server: bits & 4 != 0,
            web: bits & 2 != 0,
            manifest: bits & 1 != 0,
        };
        let plan = RebuildPlan::for_changes(c);

        out.push_str(&format!(
            "  {}{}{})\n",
            c.server as u8, c.web as u8, c.manifest as u8
        ));

        match &plan.rebuild {
            Rebuild::Nothing => {
                out.push_str("    echo \"No changes detected. Containers left untouched.\"\n");
                out.push_str("    exit 0\n");
            }
            Rebuild::FullStack => {
                out.push_str("    full_rebuild\n");
            }
            Rebuild::Services(services) => {
                for svc in services {
                    out.push_str(&format!("    rebuild_service {}\n", svc));
                }
            }
        }
        if plan.reapply_firewall {
            out.push_str("    apply_firewall\n");
        }
        if plan.run_migration {
            out.push_str("    run_migration\n");
        }
        out.push_str("    ;;\n");
    }

    out.push_str("esac\n");
    out
}
