//! CLI smoke entry point for `report_core`.
//!
//! # Responsibility
//! - Verify `report_core` linkage (`ping`, version).
//! - Optionally start engine file logging under `--log-dir`.
//! - Print the numbering outline of a report config for a list of primary
//!   group names, one JSON object per line.
//!
//! Usage: `report_cli [--log-dir ABS_DIR] [CONFIG_JSON [GROUP_NAME...]]`

use report_core::{ArtifactNumber, GroupKind, MemoryFieldStore, ReportConfig, ReportEngine};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Default)]
struct CliArgs {
    log_dir: Option<PathBuf>,
    config_path: Option<String>,
    group_names: Vec<String>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs, String> {
    let mut parsed = CliArgs::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--log-dir" {
            let dir = args.next().ok_or("--log-dir needs a directory")?;
            parsed.log_dir = Some(PathBuf::from(dir));
        } else if let Some(dir) = arg.strip_prefix("--log-dir=") {
            parsed.log_dir = Some(PathBuf::from(dir));
        } else if parsed.config_path.is_none() {
            parsed.config_path = Some(arg);
        } else {
            parsed.group_names.push(arg);
        }
    }
    Ok(parsed)
}

fn main() -> ExitCode {
    println!("report_core ping={}", report_core::ping());
    println!("report_core version={}", report_core::core_version());

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("report_cli: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(dir) = &args.log_dir {
        // Logging is optional here; the outline is still printed.
        match report_core::init_logging(report_core::default_log_level(), dir) {
            Ok(()) => {
                if let Some(settings) = report_core::logging_status() {
                    println!("report_core logging {settings}");
                }
            }
            Err(err) => eprintln!("report_cli: logging disabled: {err}"),
        }
    }

    let Some(config_path) = args.config_path.as_deref() else {
        return ExitCode::SUCCESS;
    };
    match print_outline(config_path, &args.group_names) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("report_cli: {err}");
            ExitCode::FAILURE
        }
    }
}

fn print_outline(config_path: &str, group_names: &[String]) -> Result<(), report_core::ConfigError> {
    let config = ReportConfig::from_path(config_path)?;
    let mut engine = ReportEngine::from_config(MemoryFieldStore::new(), &config)?;
    engine.replace_groups(GroupKind::Primary, group_names);

    for entry in engine.outline() {
        let line = json!({
            "kind": format!("{:?}", entry.kind).to_lowercase(),
            "section": entry.scope.section_id,
            "instance": entry.scope.instance,
            "prefix": entry.prefix.as_str(),
            "artifact": entry.artifact,
            "index": entry.local_index,
            "number": engine.render_number(ArtifactNumber::Assigned(entry.number), &entry.scope),
        });
        println!("{line}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::parse_args;
    use std::path::PathBuf;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn log_dir_flag_is_taken_out_of_positionals() {
        let parsed = parse_args(args(&["--log-dir", "/tmp/logs", "report.json", "Ccollpa"])).unwrap();
        assert_eq!(parsed.log_dir, Some(PathBuf::from("/tmp/logs")));
        assert_eq!(parsed.config_path.as_deref(), Some("report.json"));
        assert_eq!(parsed.group_names, vec!["Ccollpa".to_string()]);

        let inline = parse_args(args(&["report.json", "--log-dir=/var/log/r"])).unwrap();
        assert_eq!(inline.log_dir, Some(PathBuf::from("/var/log/r")));
        assert!(inline.group_names.is_empty());
    }

    #[test]
    fn log_dir_flag_without_value_is_rejected() {
        assert!(parse_args(args(&["--log-dir"])).is_err());
    }
}
