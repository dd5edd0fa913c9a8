use anyhow::Result;

use nscan::config::{OutputFormat, ScanLevel, ScanOptions};

#[derive(Debug, PartialEq)]
pub(crate) enum CliCommand {
    Scan(Box<CliOverrides>),
    Interfaces,
    Help,
    Version,
}

/// Flag values to lay over the config-file options.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct CliOverrides {
    pub target: Option<String>,
    pub interface: Option<String>,
    pub passive: bool,
    pub watch: bool,
    pub output: Option<String>,
    pub format: Option<OutputFormat>,
    pub verbose: bool,
    pub no_os_detection: bool,
    pub level: Option<ScanLevel>,
    pub host_timeout: Option<u64>,
    pub no_ipv6: bool,
    pub session_timeout: Option<u64>,
}

impl CliOverrides {
    /// Apply the flags on top of file-derived options. Flags win.
    pub fn apply(self, mut opts: ScanOptions) -> Result<ScanOptions> {
        if let Some(target) = self.target {
            opts.target = Some(target.parse()?);
        }
        if self.interface.is_some() {
            opts.interface = self.interface;
        }
        if self.passive {
            opts.passive = true;
        }
        if self.watch {
            opts.watch = true;
        }
        if let Some(output) = self.output {
            opts.output = Some(output.into());
        }
        if let Some(format) = self.format {
            opts.format = format;
        }
        if self.verbose {
            opts.verbose = true;
        }
        if self.no_os_detection {
            opts.os_detection = false;
        }
        if let Some(level) = self.level {
            opts.level = level;
        }
        if self.host_timeout.is_some() {
            opts.host_timeout = self.host_timeout;
        }
        if self.no_ipv6 {
            opts.ipv6 = false;
        }
        if self.session_timeout.is_some() {
            opts.session_timeout = self.session_timeout;
        }
        Ok(opts)
    }
}

pub(crate) fn version_text() -> String {
    format!("nscan {}", env!("CARGO_PKG_VERSION"))
}

pub(crate) fn usage_text() -> String {
    format!(
        "{version}
Multi-source LAN discovery

Usage:
  nscan [scan] [options]
  nscan interfaces
  nscan --help
  nscan --version

Options:
  -t, --target <CIDR>       Target range (default: derived from interface)
  -i, --interface <NAME>    Network interface by exact name
      --passive             Passive listeners only; no active probes
      --watch               Keep monitoring after discovery completes
  -o, --output <PATH>       Write the final snapshot to a file
      --format <FMT>        Output format: json, csv, table (default: table)
  -v, --verbose             Debug-level logging
      --no-os-detection     Disable OS fingerprinting probes
      --level <LEVEL>       Scan level: quick (alias: fast), standard, thorough
      --host-timeout <SECS> Per-host timeout for the deep scan
      --timeout <SECS>      Overall session timeout
      --no-ipv6             Disable IPv6 discovery
  -h, --help                Show this help text
  -V, --version             Show version",
        version = version_text()
    )
}

fn parse_seconds(flag: &str, raw: &str) -> Result<u64> {
    raw.parse::<u64>().ok().filter(|v| *v > 0).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid value for {}: '{}'. Expected a positive number of seconds.\n\n{}",
            flag,
            raw,
            usage_text()
        )
    })
}

pub(crate) fn parse_cli_args<I, S>(args: I) -> Result<CliCommand>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut iter = args.into_iter();
    let _program_name = iter.next();

    let mut command: Option<String> = None;
    let mut overrides = CliOverrides::default();

    let next_value = |iter: &mut dyn Iterator<Item = S>, flag: &str| -> Result<String> {
        iter.next()
            .map(|v| v.as_ref().to_string())
            .ok_or_else(|| anyhow::anyhow!("Missing value for {}.\n\n{}", flag, usage_text()))
    };

    while let Some(arg) = iter.next() {
        let arg = arg.as_ref().to_string();
        match arg.as_str() {
            "-h" | "--help" => return Ok(CliCommand::Help),
            "-V" | "--version" => return Ok(CliCommand::Version),
            "scan" | "interfaces" => {
                if command.as_deref().is_some_and(|existing| existing != arg) {
                    return Err(anyhow::anyhow!(
                        "Multiple commands provided. Use only one command.\n\n{}",
                        usage_text()
                    ));
                }
                command = Some(arg.clone());
            }
            "-t" | "--target" => overrides.target = Some(next_value(&mut iter, "--target")?),
            "-i" | "--interface" => {
                overrides.interface = Some(next_value(&mut iter, "--interface")?);
            }
            "--passive" => overrides.passive = true,
            "--watch" => overrides.watch = true,
            "-o" | "--output" => overrides.output = Some(next_value(&mut iter, "--output")?),
            "--format" => {
                let value = next_value(&mut iter, "--format")?;
                overrides.format = Some(OutputFormat::parse(&value)?);
            }
            "-v" | "--verbose" => overrides.verbose = true,
            "--no-os-detection" => overrides.no_os_detection = true,
            "--level" => {
                let value = next_value(&mut iter, "--level")?;
                overrides.level = Some(ScanLevel::parse(&value)?);
            }
            "--host-timeout" => {
                let value = next_value(&mut iter, "--host-timeout")?;
                overrides.host_timeout = Some(parse_seconds("--host-timeout", &value)?);
            }
            "--timeout" => {
                let value = next_value(&mut iter, "--timeout")?;
                overrides.session_timeout = Some(parse_seconds("--timeout", &value)?);
            }
            "--no-ipv6" => overrides.no_ipv6 = true,
            other => {
                if let Some(value) = other.strip_prefix("--target=") {
                    overrides.target = Some(value.to_string());
                } else if let Some(value) = other.strip_prefix("--interface=") {
                    overrides.interface = Some(value.to_string());
                } else if let Some(value) = other.strip_prefix("--level=") {
                    overrides.level = Some(ScanLevel::parse(value)?);
                } else if let Some(value) = other.strip_prefix("--format=") {
                    overrides.format = Some(OutputFormat::parse(value)?);
                } else {
                    return Err(anyhow::anyhow!(
                        "Unknown argument: {other}\n\n{}",
                        usage_text()
                    ));
                }
            }
        }
    }

    match command.as_deref().unwrap_or("scan") {
        "scan" => Ok(CliCommand::Scan(Box::new(overrides))),
        "interfaces" => {
            if overrides != CliOverrides::default() {
                return Err(anyhow::anyhow!(
                    "Scan options are not valid with the interfaces command.\n\n{}",
                    usage_text()
                ));
            }
            Ok(CliCommand::Interfaces)
        }
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_help_and_version() {
        assert_eq!(parse_cli_args(["nscan", "--help"]).unwrap(), CliCommand::Help);
        assert_eq!(
            parse_cli_args(["nscan", "-V"]).unwrap(),
            CliCommand::Version
        );
    }

    #[test]
    fn default_command_is_scan() {
        let parsed = parse_cli_args(["nscan"]).unwrap();
        assert_eq!(parsed, CliCommand::Scan(Box::default()));
    }

    #[test]
    fn scan_flags_collected() {
        let parsed = parse_cli_args([
            "nscan",
            "scan",
            "--target",
            "192.168.1.0/24",
            "--level",
            "fast",
            "--no-ipv6",
            "--watch",
            "-v",
        ])
        .unwrap();
        let CliCommand::Scan(overrides) = parsed else {
            panic!("expected scan command");
        };
        assert_eq!(overrides.target.as_deref(), Some("192.168.1.0/24"));
        assert_eq!(overrides.level, Some(ScanLevel::Quick));
        assert!(overrides.no_ipv6);
        assert!(overrides.watch);
        assert!(overrides.verbose);
    }

    #[test]
    fn equals_form_accepted() {
        let parsed = parse_cli_args(["nscan", "--level=thorough", "--target=10.0.0.0/16"]).unwrap();
        let CliCommand::Scan(overrides) = parsed else {
            panic!("expected scan command");
        };
        assert_eq!(overrides.level, Some(ScanLevel::Thorough));
        assert_eq!(overrides.target.as_deref(), Some("10.0.0.0/16"));
    }

    #[test]
    fn overrides_apply_over_file_options() {
        let overrides = CliOverrides {
            level: Some(ScanLevel::Thorough),
            no_os_detection: true,
            ..Default::default()
        };
        let opts = overrides.apply(ScanOptions::default()).unwrap();
        assert_eq!(opts.level, ScanLevel::Thorough);
        assert!(!opts.os_detection);
        assert!(opts.ipv6);
    }

    #[test]
    fn bad_values_error() {
        assert!(parse_cli_args(["nscan", "--level", "warp"]).is_err());
        assert!(parse_cli_args(["nscan", "--host-timeout", "0"]).is_err());
        assert!(parse_cli_args(["nscan", "--unknown"]).is_err());
        assert!(parse_cli_args(["nscan", "interfaces", "--watch"]).is_err());
    }

    #[test]
    fn invalid_target_rejected_on_apply() {
        let overrides = CliOverrides {
            target: Some("not-a-cidr".to_string()),
            ..Default::default()
        };
        assert!(overrides.apply(ScanOptions::default()).is_err());
    }
}
