//! Test suite for the meshforge crate.
//! Covers registry persistence, script rendering, the rebuild decision
//! table, event framing, and the executor's pure decision logic.

#[cfg(test)]
mod registry_tests {
    use crate::registry::{NewTarget, TargetRegistry, TargetStatus, HISTORY_CAP};

    fn sample(name: &str) -> NewTarget {
        NewTarget {
            name: name.to_string(),
            host: "10.0.0.5".to_string(),
            port: 22,
            username: "root".to_string(),
            password: Some("hunter2".to_string()),
            private_key: None,
        }
    }

    #[tokio::test]
    async fn test_list_never_exposes_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TargetRegistry::open(dir.path()).unwrap();
        registry.create(sample("node-a")).await.unwrap();

        let listed = serde_json::to_string(&registry.list().await).unwrap();
        assert!(
            !listed.contains("password") && !listed.contains("hunter2"),
            "list() must not leak passwords: {}",
            listed
        );
        assert!(
            !listed.contains("private_key"),
            "list() must not leak key material"
        );
    }

    #[tokio::test]
    async fn test_create_validates_required_fields() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TargetRegistry::open(dir.path()).unwrap();

        let mut missing_host = sample("node-a");
        missing_host.host = "  ".to_string();
        assert!(registry.create(missing_host).await.is_err());
    }

    #[tokio::test]
    async fn test_new_target_starts_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TargetRegistry::open(dir.path()).unwrap();
        let id = registry.create(sample("node-a")).await.unwrap();

        let target = registry.get(&id).await.unwrap();
        assert_eq!(target.status, TargetStatus::Unknown);
        assert!(target.history.is_empty());
    }

    #[tokio::test]
    async fn test_history_is_bounded_and_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TargetRegistry::open(dir.path()).unwrap();
        let id = registry.create(sample("node-a")).await.unwrap();

        for i in 0..60 {
            registry
                .update(&id, |t| t.record(&format!("op-{}", i), true, None))
                .await
                .unwrap();
        }

        let target = registry.get(&id).await.unwrap();
        assert_eq!(target.history.len(), HISTORY_CAP, "history must stay capped");
        assert_eq!(
            target.history[0].action, "op-59",
            "newest entry must come first"
        );
        assert_eq!(target.history[HISTORY_CAP - 1].action, "op-10");
    }

    #[tokio::test]
    async fn test_registry_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let registry = TargetRegistry::open(dir.path()).unwrap();
            registry.create(sample("node-a")).await.unwrap()
        };

        let reopened = TargetRegistry::open(dir.path()).unwrap();
        let target = reopened.get(&id).await.unwrap();
        assert_eq!(target.name, "node-a");
        assert_eq!(target.password.as_deref(), Some("hunter2"));
    }

    #[tokio::test]
    async fn test_remove_forgets_target() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TargetRegistry::open(dir.path()).unwrap();
        let id = registry.create(sample("node-a")).await.unwrap();

        assert!(registry.remove(&id).await.unwrap());
        assert!(registry.get(&id).await.is_none());
        assert!(!registry.remove(&id).await.unwrap(), "second remove is a no-op");
    }

    #[tokio::test]
    async fn test_update_unknown_target_fails() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TargetRegistry::open(dir.path()).unwrap();
        assert!(registry
            .update("nope", |t| t.record("x", true, None))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_credentials_are_sealed_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TargetRegistry::open(dir.path()).unwrap();
        registry.create(sample("node-a")).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("targets.json")).unwrap();
        assert!(
            !raw.contains("hunter2"),
            "persisted document must not hold clear-text credentials"
        );
        assert!(raw.contains("enc1:"), "credentials should be sealed");
    }
}

#[cfg(test)]
mod vault_tests {
    use crate::vault::{open_sealed, seal, StoreKey};

    #[test]
    fn test_seal_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let key = StoreKey::load_or_generate(dir.path()).unwrap();

        let sealed = seal(&key, "hunter2").unwrap();
        assert!(sealed.starts_with("enc1:"));
        assert!(!sealed.contains("hunter2"));
        assert_eq!(open_sealed(&key, &sealed).unwrap(), "hunter2");
    }

    #[test]
    fn test_seal_uses_fresh_nonces() {
        let dir = tempfile::tempdir().unwrap();
        let key = StoreKey::load_or_generate(dir.path()).unwrap();
        assert_ne!(
            seal(&key, "same").unwrap(),
            seal(&key, "same").unwrap(),
            "two seals of the same value must differ"
        );
    }

    #[test]
    fn test_unsealed_values_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let key = StoreKey::load_or_generate(dir.path()).unwrap();
        // Documents written before encryption-at-rest still load
        assert_eq!(open_sealed(&key, "legacy-plain").unwrap(), "legacy-plain");
    }

    #[test]
    fn test_tampered_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let key = StoreKey::load_or_generate(dir.path()).unwrap();

        assert!(open_sealed(&key, "enc1:zz-not-hex").is_err());
        assert!(open_sealed(&key, "enc1:00").is_err(), "too short to hold a nonce");

        let mut sealed = seal(&key, "value").unwrap();
        let last = sealed.pop().unwrap();
        sealed.push(if last == '0' { '1' } else { '0' });
        assert!(open_sealed(&key, &sealed).is_err(), "bit-flips must not decrypt");
    }

    #[test]
    fn test_store_key_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let sealed = {
            let key = StoreKey::load_or_generate(dir.path()).unwrap();
            seal(&key, "stable").unwrap()
        };
        let reloaded = StoreKey::load_or_generate(dir.path()).unwrap();
        assert_eq!(open_sealed(&reloaded, &sealed).unwrap(), "stable");
    }
}

#[cfg(test)]
mod changes_tests {
    use crate::changes::{
        render_dispatch, ChangeSet, Rebuild, RebuildPlan, SERVER_SERVICE, WEB_SERVICE,
    };

    fn plan(server: bool, web: bool, manifest: bool) -> RebuildPlan {
        RebuildPlan::for_changes(ChangeSet {
            server,
            web,
            manifest,
        })
    }

    #[test]
    fn test_manifest_change_rebuilds_full_stack() {
        for (server, web) in [(false, false), (true, false), (false, true), (true, true)] {
            let p = plan(server, web, true);
            assert_eq!(p.rebuild, Rebuild::FullStack);
            assert!(p.reapply_firewall, "manifest change re-applies firewall");
        }
    }

    #[test]
    fn test_server_only_rebuilds_backend_only() {
        let p = plan(true, false, false);
        assert_eq!(p.rebuild, Rebuild::Services(vec![SERVER_SERVICE]));
        assert!(p.run_migration);
        assert!(p.reapply_firewall);
    }

    #[test]
    fn test_web_only_rebuilds_frontend_only() {
        let p = plan(false, true, false);
        assert_eq!(p.rebuild, Rebuild::Services(vec![WEB_SERVICE]));
        assert!(!p.run_migration, "frontend change never migrates");
        assert!(!p.reapply_firewall, "frontend change never touches firewall");
    }

    #[test]
    fn test_both_services_without_manifest() {
        let p = plan(true, true, false);
        assert_eq!(p.rebuild, Rebuild::Services(vec![SERVER_SERVICE, WEB_SERVICE]));
    }

    #[test]
    fn test_no_changes_is_noop() {
        let p = plan(false, false, false);
        assert!(p.is_noop());
        assert!(!p.run_migration);
        assert!(!p.reapply_firewall);
    }

    #[test]
    fn test_migration_follows_server_flag_only() {
        for bits in 0..8u8 {
            let c = ChangeSet {
                server: bits & 4 != 0,
                web: bits & 2 != 0,
                manifest: bits & 1 != 0,
            };
            let p = RebuildPlan::for_changes(c);
            assert_eq!(p.run_migration, c.server);
            assert_eq!(p.reapply_firewall, c.server || c.manifest);
        }
    }

    #[test]
    fn test_dispatch_covers_all_combinations() {
        let dispatch = render_dispatch();
        for bits in 0..8u8 {
            let label = format!(
                "  {}{}{})",
                (bits & 4 != 0) as u8,
                (bits & 2 != 0) as u8,
                (bits & 1 != 0) as u8
            );
            assert!(dispatch.contains(&label), "missing arm {:?}", label);
        }
    }

    #[test]
    fn test_dispatch_arms_match_plan() {
        let dispatch = render_dispatch();
        assert!(dispatch.contains("  000)\n    echo \"No changes detected"));
        assert!(dispatch.contains("  010)\n    rebuild_service web\n    ;;"));
        assert!(dispatch.contains(
            "  100)\n    rebuild_service control-plane\n    apply_firewall\n    run_migration\n    ;;"
        ));
        assert!(dispatch.contains(
            "  110)\n    rebuild_service control-plane\n    rebuild_service web\n    apply_firewall\n    run_migration\n    ;;"
        ));
        assert!(dispatch.contains(
            "  111)\n    full_rebuild\n    apply_firewall\n    run_migration\n    ;;"
        ));
        assert!(dispatch.contains("  001)\n    full_rebuild\n    apply_firewall\n    ;;"));
    }
}

#[cfg(test)]
mod scripts_tests {
    use crate::scripts::{
        shell_quote, Action, ScriptBuilder, ScriptConfig, SECRETS_BEGIN, SECRETS_END,
    };

    fn builder() -> ScriptBuilder {
        ScriptBuilder::new(true)
    }

    #[test]
    fn test_shell_quote_plain_and_empty() {
        assert_eq!(shell_quote("abc"), "'abc'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_shell_quote_neutralizes_single_quotes() {
        assert_eq!(shell_quote("it's"), r#"'it'\''s'"#);
        // A classic injection attempt stays inert inside quotes
        let quoted = shell_quote("'; rm -rf / #");
        assert!(quoted.starts_with('\''));
        assert!(!quoted.contains("\n"));
    }

    #[test]
    fn test_install_script_orders_vpn_and_firewall_before_services() {
        let script = builder().build(Action::Install, &ScriptConfig::default());

        let vpn_up = script.find("wg-quick@wg-admin").expect("admin vpn bootstrap");
        let firewall = script.find("firewall.sh").expect("firewall baseline");
        let compose_up = script.find("$COMPOSE up -d --build").expect("service start");
        assert!(
            vpn_up < compose_up && firewall < compose_up,
            "tunnel and firewall must be up before anything serves"
        );
    }

    #[test]
    fn test_install_script_emits_secrets_block_once() {
        let script = builder().build(Action::Install, &ScriptConfig::default());
        assert_eq!(script.matches(SECRETS_BEGIN).count(), 1);
        assert_eq!(script.matches(SECRETS_END).count(), 1);
        assert!(script.contains("DASHBOARD_URL="));
    }

    #[test]
    fn test_install_script_quotes_config_values() {
        let config = ScriptConfig {
            admin_password: Some("p@ss'word".to_string()),
            ..Default::default()
        };
        let script = builder().build(Action::Install, &config);
        assert!(
            script.contains(r#"ADMIN_PASSWORD='p@ss'\''word'"#),
            "config values must be shell-quoted"
        );
    }

    #[test]
    fn test_noninteractive_flag_controls_apt_frontend() {
        let on = ScriptBuilder::new(true).build(Action::Install, &ScriptConfig::default());
        let off = ScriptBuilder::new(false).build(Action::Install, &ScriptConfig::default());
        assert!(on.contains("export DEBIAN_FRONTEND=noninteractive"));
        assert!(!off.contains("DEBIAN_FRONTEND"));
    }

    #[test]
    fn test_reinstall_keeps_volumes_and_data() {
        let script = builder().build(Action::Reinstall, &ScriptConfig::default());
        assert!(
            script.contains("$COMPOSE down --rmi local"),
            "reinstall stops the stack"
        );
        assert!(
            !script.contains("down -v"),
            "reinstall must never wipe volumes"
        );
        assert!(script.contains("! -name data"), "data/ survives the cleanup");
        assert!(
            !script.contains("wg-quick@wg-admin"),
            "reinstall skips the one-time network bootstrap"
        );
    }

    #[test]
    fn test_update_script_exits_early_when_unchanged() {
        let script = builder().build(Action::Update, &ScriptConfig::default());
        assert!(script.contains(r#"= "000""#));
        assert!(script.contains("No changes detected"));
        // The no-op branch must fire before anything touches containers
        let early_exit = script.find(r#"= "000""#).unwrap();
        let rebuild = script.find("full_rebuild()").unwrap();
        assert!(early_exit < rebuild);
    }

    #[test]
    fn test_update_script_excludes_secrets_data_and_logs() {
        let script = builder().build(Action::Update, &ScriptConfig::default());
        assert!(script.contains("--exclude='.env'"));
        assert!(script.contains("--exclude='data'"));
        assert!(script.contains("--exclude='*.log'"));
    }

    #[test]
    fn test_update_script_forces_flags_on_dockerfile_change() {
        let script = builder().build(Action::Update, &ScriptConfig::default());
        assert!(script.contains("Dockerfile.control-plane") && script.contains("SERVER_CHANGED=1"));
        assert!(script.contains("Dockerfile.web") && script.contains("WEB_CHANGED=1"));
    }

    #[test]
    fn test_migrate_script_touches_nothing_else() {
        let script = builder().build(Action::Migrate, &ScriptConfig::default());
        assert!(script.contains("migrate"));
        assert!(!script.contains("tar -xzf"), "migrate must not unpack files");
        assert!(!script.contains("up -d"), "migrate must not restart services");
    }

    #[test]
    fn test_uninstall_script_is_nuclear() {
        let script = builder().build(Action::Uninstall, &ScriptConfig::default());
        assert!(script.contains("down -v --rmi local"));
        assert!(script.contains("wg-quick down wg-admin"));
        assert!(script.contains("wg-quick down wg0"));
        assert!(script.contains("iptables -P INPUT ACCEPT"));
        assert!(script.contains("iptables -F"));
        assert!(script.contains(r#"rm -rf "$INSTALL_DIR""#));
        assert!(
            !script.contains("set -e"),
            "teardown keeps going past individual failures"
        );
    }

    #[test]
    fn test_action_metadata() {
        assert_eq!(Action::Install.name(), "install");
        assert!(Action::Update.needs_archive());
        assert!(!Action::Migrate.needs_archive());
        assert!(!Action::Uninstall.needs_archive());
    }
}

#[cfg(test)]
mod events_tests {
    use crate::events::DeployEvent;
    use crate::session::OutputChunk;

    #[test]
    fn test_text_wire_shape_omits_stderr_when_false() {
        let ev = DeployEvent::Text {
            text: "hello\n".to_string(),
            stderr: false,
        };
        let json = ev.to_json();
        assert_eq!(json["text"], "hello\n");
        assert!(json.get("stderr").is_none());
    }

    #[test]
    fn test_stderr_wire_shape() {
        let ev = DeployEvent::Text {
            text: "boom\n".to_string(),
            stderr: true,
        };
        assert_eq!(ev.to_json(), serde_json::json!({ "text": "boom\n", "stderr": true }));
    }

    #[test]
    fn test_terminal_events() {
        let done = DeployEvent::Done { success: true };
        assert!(done.is_terminal());
        assert_eq!(done.to_json(), serde_json::json!({ "done": true, "success": true }));

        let err = DeployEvent::Error {
            message: "ssh exploded".to_string(),
        };
        assert!(err.is_terminal());
        assert_eq!(err.to_json()["error"], "ssh exploded");

        assert!(!DeployEvent::info("x").is_terminal());
    }

    #[test]
    fn test_from_chunk_restores_newline() {
        let ev = DeployEvent::from_chunk(OutputChunk {
            text: "line".to_string(),
            stderr: false,
        });
        assert_eq!(
            ev,
            DeployEvent::Text {
                text: "line\n".to_string(),
                stderr: false
            }
        );
    }
}

#[cfg(test)]
mod deploy_tests {
    use crate::deploy::{parse_secrets_block, status_after, DeployRequest};
    use crate::registry::TargetStatus;
    use crate::scripts::{Action, SECRETS_BEGIN, SECRETS_END};

    #[test]
    fn test_status_after_install_outcomes() {
        assert_eq!(
            status_after(Action::Install, true),
            Some(TargetStatus::Installed)
        );
        assert_eq!(
            status_after(Action::Install, false),
            Some(TargetStatus::Error)
        );
        assert_eq!(
            status_after(Action::Update, false),
            Some(TargetStatus::Error)
        );
    }

    #[test]
    fn test_uninstall_forces_not_installed_even_on_failure() {
        assert_eq!(
            status_after(Action::Uninstall, false),
            Some(TargetStatus::NotInstalled)
        );
        assert_eq!(
            status_after(Action::Uninstall, true),
            Some(TargetStatus::NotInstalled)
        );
    }

    #[test]
    fn test_migrate_leaves_status_alone() {
        assert_eq!(status_after(Action::Migrate, true), None);
        assert_eq!(status_after(Action::Migrate, false), None);
    }

    #[test]
    fn test_request_action_precedence() {
        let req = DeployRequest {
            migrate_only: true,
            update: true,
            reinstall: true,
            ..Default::default()
        };
        assert_eq!(req.action(), Action::Migrate);

        let req = DeployRequest {
            update: true,
            reinstall: true,
            ..Default::default()
        };
        assert_eq!(req.action(), Action::Update);

        let req = DeployRequest {
            reinstall: true,
            ..Default::default()
        };
        assert_eq!(req.action(), Action::Reinstall);

        assert_eq!(DeployRequest::default().action(), Action::Install);
    }

    #[test]
    fn test_parse_secrets_block_roundtrip() {
        let output = format!(
            "noise\n{}\nAPI_KEY=abc123\nADMIN_PASSWORD=s3cret\nDASHBOARD_URL=http://1.2.3.4:8080\n{}\ntrailing\n",
            SECRETS_BEGIN, SECRETS_END
        );
        let secrets = parse_secrets_block(&output).unwrap().unwrap();
        assert_eq!(secrets.get("API_KEY").map(String::as_str), Some("abc123"));
        assert_eq!(secrets.len(), 3);
    }

    #[test]
    fn test_parse_secrets_block_absent() {
        assert!(parse_secrets_block("just some output\n").unwrap().is_none());
    }

    #[test]
    fn test_parse_secrets_block_value_may_contain_equals() {
        let output = format!("{}\nURL=http://x?a=b\n{}\n", SECRETS_BEGIN, SECRETS_END);
        let secrets = parse_secrets_block(&output).unwrap().unwrap();
        assert_eq!(secrets.get("URL").map(String::as_str), Some("http://x?a=b"));
    }

    #[test]
    fn test_parse_secrets_block_rejects_unterminated() {
        let output = format!("{}\nAPI_KEY=abc\n", SECRETS_BEGIN);
        assert!(parse_secrets_block(&output).is_err());
    }

    #[test]
    fn test_parse_secrets_block_rejects_malformed_lines() {
        let bad_key = format!("{}\nnot a kv line\n{}\n", SECRETS_BEGIN, SECRETS_END);
        assert!(parse_secrets_block(&bad_key).is_err());

        let lowercase = format!("{}\napi_key=abc\n{}\n", SECRETS_BEGIN, SECRETS_END);
        assert!(parse_secrets_block(&lowercase).is_err());
    }

    #[test]
    fn test_parse_secrets_block_tolerates_crlf() {
        let output = format!("{}\r\nAPI_KEY=abc\r\n{}\r\n", SECRETS_BEGIN, SECRETS_END);
        let secrets = parse_secrets_block(&output).unwrap().unwrap();
        assert_eq!(secrets.get("API_KEY").map(String::as_str), Some("abc"));
    }
}

#[cfg(test)]
mod session_tests {
    use crate::session::{classify_connect_failure, CommandOutput, SessionError};

    #[test]
    fn test_command_output_success() {
        let out = CommandOutput {
            stdout: "ok\n".to_string(),
            stderr: String::new(),
            exit_code: 0,
        };
        assert!(out.success());
        assert_eq!(out.combined(), "ok\n");

        let failed = CommandOutput {
            stdout: String::new(),
            stderr: "nope".to_string(),
            exit_code: 1,
        };
        assert!(!failed.success());
    }

    #[test]
    fn test_classify_auth_failure() {
        let err = classify_connect_failure("root", "h", "root@h: Permission denied (publickey,password).", 255);
        assert!(matches!(err, SessionError::Auth { .. }));

        // sshpass's rejected-password exit code
        let err = classify_connect_failure("root", "h", "", 5);
        assert!(matches!(err, SessionError::Auth { .. }));
    }

    #[test]
    fn test_classify_timeout() {
        let err = classify_connect_failure(
            "root",
            "h",
            "ssh: connect to host h port 22: Connection timed out",
            255,
        );
        assert!(matches!(err, SessionError::Timeout { .. }));
    }

    #[test]
    fn test_classify_unreachable_fallback() {
        let err = classify_connect_failure(
            "root",
            "h",
            "ssh: Could not resolve hostname h: Name or service not known",
            255,
        );
        match err {
            SessionError::Unreachable { detail, .. } => {
                assert!(detail.contains("resolve hostname"))
            }
            other => panic!("expected Unreachable, got {:?}", other),
        }
    }
}

#[cfg(test)]
mod docker_tests {
    use crate::docker::{parse_json_lines, ContainerAction, ContainerInfo, PruneKind};

    #[test]
    fn test_prune_kind_commands() {
        assert_eq!(PruneKind::parse("images"), Some(PruneKind::Images));
        assert_eq!(PruneKind::parse("all"), Some(PruneKind::All));
        assert_eq!(PruneKind::parse("everything"), None);
        assert_eq!(PruneKind::All.command(), "docker system prune -af --volumes");
        assert_eq!(PruneKind::Volumes.command(), "docker volume prune -f");
    }

    #[test]
    fn test_container_action_parsing() {
        assert_eq!(ContainerAction::parse("restart"), Some(ContainerAction::Restart));
        assert_eq!(ContainerAction::parse("logs"), Some(ContainerAction::Logs));
        assert_eq!(ContainerAction::parse("exec"), None);
    }

    #[test]
    fn test_parse_json_lines_skips_garbage() {
        let stdout = concat!(
            r#"{"name":"meshforge-control-plane","status":"Up 2 days","image":"meshforge/cp","ports":"8080"}"#,
            "\n",
            "garbage line\n",
            "\n",
            r#"{"name":"meshforge-web","status":"Up 2 days","image":"meshforge/web","ports":"80"}"#,
            "\n"
        );
        let rows: Vec<ContainerInfo> = parse_json_lines(stdout);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "meshforge-control-plane");
        assert_eq!(rows[1].image, "meshforge/web");
    }
}

#[cfg(test)]
mod archive_tests {
    use crate::archive::{build_archive, ARCHIVE_EXCLUDES};
    use std::fs;

    #[tokio::test]
    async fn test_build_archive_produces_tarball() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.go"), "package main").unwrap();
        fs::create_dir(dir.path().join("deployments")).unwrap();
        fs::write(dir.path().join("deployments").join("compose.yml"), "services:").unwrap();

        let archive = build_archive(dir.path()).await.unwrap();
        let meta = fs::metadata(archive.path()).unwrap();
        assert!(meta.len() > 0, "archive should not be empty");
    }

    #[tokio::test]
    async fn test_build_archive_cleans_up_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), "x").unwrap();

        let archive = build_archive(dir.path()).await.unwrap();
        let path = archive.path().to_path_buf();
        assert!(path.exists());
        drop(archive);
        assert!(!path.exists(), "archive must vanish on drop");
    }

    #[tokio::test]
    async fn test_build_archive_rejects_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(build_archive(&missing).await.is_err());
    }

    #[test]
    fn test_excludes_cover_secrets_and_data() {
        for needed in [".env", "data", "*.log", ".git", "node_modules"] {
            assert!(
                ARCHIVE_EXCLUDES.contains(&needed),
                "{} must never ship to a target",
                needed
            );
        }
    }
}
