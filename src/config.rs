//! Command-line argument parsing for the `nm` and `ss` binaries.
//!
//! Grounded on `examples/original_source/nm.c`/`ss.c`'s `main`, which parse
//! positional `argv` by hand; here `clap`'s derive API takes over that job,
//! matching the teacher stack's CLI crate (SPEC_FULL.md §6).

use clap::Parser;

/// Default ports, matching `examples/original_source/common.h`.
pub const DEFAULT_SS_COMMAND_PORT: u16 = 8080;
pub const DEFAULT_CLIENT_PORT: u16 = 8081;
pub const DEFAULT_SS_HEARTBEAT_PORT: u16 = 8082;

#[derive(Parser, Debug)]
#[command(name = "nm", about = "docflow name server")]
pub struct NmArgs {
    /// Port storage servers dial in on to register and receive forwards.
    #[arg(long, default_value_t = DEFAULT_SS_COMMAND_PORT)]
    pub ss_command_port: u16,

    /// Port clients connect to.
    #[arg(long, default_value_t = DEFAULT_CLIENT_PORT)]
    pub client_port: u16,

    /// Port storage servers send heartbeats to.
    #[arg(long, default_value_t = DEFAULT_SS_HEARTBEAT_PORT)]
    pub ss_heartbeat_port: u16,
}

#[derive(Parser, Debug)]
#[command(name = "ss", about = "docflow storage server")]
pub struct SsArgs {
    /// Name server's address.
    pub nm_ip: String,
    /// Name server's SS command port.
    pub nm_port: u16,
    /// Port this storage server listens on for clients.
    pub client_port: u16,
    /// This storage server's numeric id, stable across restarts.
    pub ss_id: i32,
}

impl SsArgs {
    /// SPEC_FULL.md §6: both ports must be nonzero and distinct.
    pub fn validate(&self) -> Result<(), String> {
        if self.nm_port == 0 || self.client_port == 0 {
            return Err("ports must be in 1..=65535".into());
        }
        if self.nm_port == self.client_port {
            return Err("nm_port and client_port must differ".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_matching_ports() {
        let args = SsArgs { nm_ip: "127.0.0.1".into(), nm_port: 8080, client_port: 8080, ss_id: 1 };
        assert!(args.validate().is_err());
    }

    #[test]
    fn accepts_distinct_nonzero_ports() {
        let args = SsArgs { nm_ip: "127.0.0.1".into(), nm_port: 8080, client_port: 8081, ss_id: 1 };
        assert!(args.validate().is_ok());
    }
}
