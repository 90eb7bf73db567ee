//! CLI argument parsing tests for the netup command.
//!
//! The `sim` subcommand runs the full lifecycle against the in-memory
//! stack, so these tests need neither root privileges nor a TAP device.

use assert_cmd::Command;
use predicates::prelude::*;

fn netup_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_netup"))
}

mod global_flags {
    use super::*;

    #[test]
    fn test_help() {
        netup_cmd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Single-interface network bring-up"));
    }

    #[test]
    fn test_version() {
        netup_cmd()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("netup"));
    }

    #[test]
    fn test_invalid_subcommand() {
        netup_cmd()
            .arg("invalid_command")
            .assert()
            .failure()
            .stderr(predicate::str::contains("error"));
    }
}

mod run_command {
    use super::*;

    #[test]
    fn test_run_help() {
        netup_cmd()
            .args(["run", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--debug-stats"))
            .stdout(predicate::str::contains("--iperf"));
    }

    #[test]
    fn test_run_bad_mac() {
        netup_cmd()
            .args(["run", "--mac", "02:00:00"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid MAC address"));
    }
}

mod sim_command {
    use super::*;

    #[test]
    fn test_sim_bad_lease() {
        netup_cmd()
            .args(["sim", "--lease", "10.0.0.5/33"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid prefix length"));
    }

    #[test]
    fn test_sim_reports_addresses() {
        netup_cmd()
            .args([
                "sim",
                "--gateway",
                "10.0.0.1",
                "--link-local-id",
                "1",
                "--duration",
                "300",
            ])
            .assert()
            .success()
            .stderr(predicate::str::contains(
                "ip4_addr: 10.0.0.5 netmask: 255.255.255.0 gw: 10.0.0.1",
            ))
            .stderr(predicate::str::contains("ip6_addr[0]: fe80::1"));
    }

    #[test]
    fn test_sim_reinit_reports_new_lease() {
        netup_cmd()
            .args([
                "sim",
                "--reinit-after",
                "100",
                "--reinit-lease",
                "10.0.0.7/24",
                "--duration",
                "400",
            ])
            .assert()
            .success()
            .stderr(predicate::str::contains("ip4_addr: 10.0.0.5"))
            .stderr(predicate::str::contains("interface reinitialized"))
            .stderr(predicate::str::contains("ip4_addr: 10.0.0.7"));
    }

    #[test]
    fn test_sim_json_events() {
        netup_cmd()
            .args(["--json", "sim", "--duration", "300"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Ipv4Assigned"))
            .stdout(predicate::str::contains("\"interfaces_added\""));
    }
}
