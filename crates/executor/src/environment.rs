use crate::process_engine::Shell;
use async_trait::async_trait;
use std::env;
use std::process::Stdio;
use sysinfo::System;
use techie_interfaces::EnvironmentProbe;
use techie_protocol::HostInfo;
use tokio::process::Command;
use tracing::debug;

/// Describes the local machine from the OS, environment variables and a
/// system-info command.
#[derive(Debug, Clone)]
pub struct HostProbe {
    shell: Shell,
}

impl HostProbe {
    pub fn new(shell: Shell) -> Self {
        Self { shell }
    }

    pub fn capture_os() -> String {
        let os_type = System::name().unwrap_or_else(|| env::consts::FAMILY.to_string());
        format!("{} {} ({})", env::consts::OS, os_type, env::consts::ARCH)
    }

    async fn system_info(&self) -> String {
        let (program, args): (&str, &[&str]) = if cfg!(windows) {
            ("systeminfo", &[])
        } else {
            ("uname", &["-a"])
        };

        match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !stdout.is_empty() {
                    return stdout;
                }
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                if !stderr.is_empty() {
                    return stderr;
                }
            }
            Err(e) => debug!("{} unavailable: {}", program, e),
        }

        Self::sysinfo_summary()
    }

    fn sysinfo_summary() -> String {
        [
            System::long_os_version(),
            System::kernel_version(),
            System::host_name(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
    }

    fn shell_info(&self) -> String {
        let var = if cfg!(windows) { "COMSPEC" } else { "SHELL" };
        env_or(&[var], &self.shell.program)
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new(Shell::platform_default())
    }
}

#[async_trait]
impl EnvironmentProbe for HostProbe {
    async fn host_info(&self) -> HostInfo {
        HostInfo {
            system_info: self.system_info().await,
            shell_info: self.shell_info(),
            username: env_or(&["USER", "USERNAME", "LOGNAME"], ""),
            os: Self::capture_os(),
            home: env_or(&["HOME", "USERPROFILE"], ""),
        }
    }
}

fn env_or(vars: &[&str], fallback: &str) -> String {
    vars.iter()
        .find_map(|var| env::var(var).ok().filter(|value| !value.is_empty()))
        .unwrap_or_else(|| fallback.to_string())
}
