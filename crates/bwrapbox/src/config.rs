//! Supervisor configuration and argv partitioning.
//!
//! One left-to-right pass splits bwrapbox's argv into supervisor options
//! and pass-through bwrap arguments. Unknown tokens belong to bwrap, and
//! everything after `--` is forwarded verbatim (including the `--`), so
//! bwrapbox can sit in front of any bwrap invocation without knowing
//! bwrap's flag set.

use std::ffi::CString;
use std::path::PathBuf;

use crate::cgroup;
use crate::error::Error;
use crate::rlimit;
use crate::Result;

/// Parsed supervisor configuration, immutable after [`parse`].
#[derive(Debug)]
pub struct Config {
    /// Cgroup mode directory; `None` means direct exec with no cgroup.
    pub cgroup: Option<PathBuf>,
    pub cgroup_overwrite: bool,
    /// `(control file, value)` pairs written in order.
    pub cgroup_limits: Vec<(String, i64)>,
    /// CPU-time soft threshold in usecs (`--climit time.high`), `None` = off.
    pub cpu_high_usecs: Option<u64>,
    /// CPU-time hard threshold in usecs (`--climit time.max`).
    pub cpu_max_usecs: Option<u64>,
    /// Wall-clock soft threshold in usecs (`--climit-elapsed-high`).
    pub wall_high_usecs: Option<u64>,
    /// Wall-clock hard threshold in usecs (`--climit-elapsed-max`).
    pub wall_max_usecs: Option<u64>,
    /// Rlimit rules applied in the exec'ing process, in order.
    pub exec_limits: Vec<rlimit::Rule>,
    /// `None` = keep the current uid; the syscall is also skipped when the
    /// current id already matches.
    pub exec_uid: Option<u32>,
    pub exec_gid: Option<u32>,
    pub quiet: bool,
    /// Full bwrap argv, `argv[0] == "bwrap"`. NULL-terminated at exec time.
    pub bwrap_argv: Vec<CString>,
}

/// Outcome of argv classification.
#[derive(Debug)]
pub enum Parsed {
    /// `--help` seen (or empty argv): print usage, hand off to `bwrap --help`.
    Help,
    Run(Config),
}

/// argv for the `--help` hand-off.
pub fn help_argv() -> Vec<CString> {
    vec![c"bwrap".to_owned(), c"--help".to_owned()]
}

pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Parsed> {
    let args: Vec<String> = args.into_iter().collect();
    if args.is_empty() || args.iter().any(|a| a == "--help") {
        return Ok(Parsed::Help);
    }

    let mut cgroup = None;
    let mut cgroup_overwrite = false;
    let mut cgroup_limits = Vec::new();
    let mut cpu_high_usecs = None;
    let mut cpu_max_usecs = None;
    let mut wall_high_usecs = None;
    let mut wall_max_usecs = None;
    let mut exec_limits = Vec::new();
    let mut exec_uid = None;
    let mut exec_gid = None;
    let mut quiet = false;
    let mut bwrap_argv = vec![c"bwrap".to_owned()];
    let mut passthrough = false;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        if passthrough {
            bwrap_argv.push(cstring(arg)?);
            i += 1;
            continue;
        }
        match arg {
            "--" => {
                bwrap_argv.push(cstring(arg)?);
                passthrough = true;
            }
            "--cgroup" => {
                cgroup = Some(cgroup::resolve(take(&args, &mut i, arg)?));
            }
            "--cgroup-overwrite" => cgroup_overwrite = true,
            "--climit" => {
                let var = take(&args, &mut i, arg)?.to_string();
                let value = take(&args, &mut i, arg)?;
                // time.high/time.max are the CPU watchdog, not file writes.
                match var.as_str() {
                    "time.high" => cpu_high_usecs = parse_usecs(arg, value)?,
                    "time.max" => cpu_max_usecs = parse_usecs(arg, value)?,
                    _ => cgroup_limits.push((var, parse_i64(arg, value)?)),
                }
            }
            "--rlimit" => {
                let var = take(&args, &mut i, arg)?.to_string();
                let value = take(&args, &mut i, arg)?;
                exec_limits.push(rlimit::parse_rule(&var, value)?);
            }
            "--climit-elapsed-high" | "--climit-elapsed-max" => {
                if cgroup.is_none() {
                    return Err(Error::Parse("enable cgroup to limit time".into()));
                }
                let value = parse_usecs(arg, take(&args, &mut i, arg)?)?;
                if arg.ends_with("high") {
                    wall_high_usecs = value;
                } else {
                    wall_max_usecs = value;
                }
            }
            "--setuid" => exec_uid = Some(parse_id(arg, take(&args, &mut i, arg)?)?),
            "--setgid" => exec_gid = Some(parse_id(arg, take(&args, &mut i, arg)?)?),
            "--quiet" => quiet = true,
            _ => bwrap_argv.push(cstring(arg)?),
        }
        i += 1;
    }

    Ok(Parsed::Run(Config {
        cgroup,
        cgroup_overwrite,
        cgroup_limits,
        cpu_high_usecs,
        cpu_max_usecs,
        wall_high_usecs,
        wall_max_usecs,
        exec_limits,
        exec_uid,
        exec_gid,
        quiet,
        bwrap_argv,
    }))
}

fn take<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| Error::Parse(format!("{flag} needs a value")))
}

fn cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| Error::Parse(format!("argument contains NUL: {s:?}")))
}

/// Negative counts disable the threshold, matching the -1 convention.
fn parse_usecs(flag: &str, value: &str) -> Result<Option<u64>> {
    let n: i64 = value
        .parse()
        .map_err(|_| Error::Parse(format!("{flag}: bad microsecond count {value:?}")))?;
    Ok(u64::try_from(n).ok())
}

fn parse_i64(flag: &str, value: &str) -> Result<i64> {
    value
        .parse()
        .map_err(|_| Error::Parse(format!("{flag}: bad value {value:?}")))
}

fn parse_id(flag: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| Error::Parse(format!("{flag}: bad id {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_run(args: &[&str]) -> Config {
        match parse(args.iter().map(|s| s.to_string())).unwrap() {
            Parsed::Run(config) => config,
            Parsed::Help => panic!("expected Run"),
        }
    }

    fn argv_strs(config: &Config) -> Vec<String> {
        config
            .bwrap_argv
            .iter()
            .map(|c| c.to_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn empty_argv_is_help() {
        assert!(matches!(parse(Vec::new()).unwrap(), Parsed::Help));
    }

    #[test]
    fn help_anywhere_wins() {
        let args = ["--cgroup", "g", "--help", "--", "/bin/true"];
        assert!(matches!(
            parse(args.iter().map(|s| s.to_string())).unwrap(),
            Parsed::Help
        ));
    }

    #[test]
    fn unknown_tokens_forward_in_order() {
        let config = parse_run(&["--ro-bind", "/", "/", "--", "/bin/echo", "hi"]);
        assert_eq!(
            argv_strs(&config),
            ["bwrap", "--ro-bind", "/", "/", "--", "/bin/echo", "hi"]
        );
        assert!(config.cgroup.is_none());
    }

    #[test]
    fn double_dash_stops_option_parsing() {
        // --quiet after -- belongs to bwrap, not to us.
        let config = parse_run(&["--", "--quiet", "--cgroup", "g"]);
        assert!(!config.quiet);
        assert!(config.cgroup.is_none());
        assert_eq!(argv_strs(&config), ["bwrap", "--", "--quiet", "--cgroup", "g"]);
    }

    #[test]
    fn relative_cgroup_name_is_rooted() {
        let config = parse_run(&["--cgroup", "grader", "--", "/bin/true"]);
        assert_eq!(
            config.cgroup.as_deref(),
            Some(std::path::Path::new("/sys/fs/cgroup/grader"))
        );
    }

    #[test]
    fn climit_time_pairs_become_cpu_thresholds() {
        let config = parse_run(&[
            "--cgroup", "g", "--climit", "time.high", "50000", "--climit", "time.max", "200000",
            "--", "/bin/true",
        ]);
        assert_eq!(config.cpu_high_usecs, Some(50_000));
        assert_eq!(config.cpu_max_usecs, Some(200_000));
        assert!(config.cgroup_limits.is_empty());
    }

    #[test]
    fn other_climits_are_literal_writes() {
        let config = parse_run(&[
            "--cgroup", "g", "--climit", "memory.max", "1048576", "--climit", "pids.max", "5",
            "--", "/bin/true",
        ]);
        assert_eq!(
            config.cgroup_limits,
            vec![("memory.max".to_string(), 1_048_576), ("pids.max".to_string(), 5)]
        );
    }

    #[test]
    fn elapsed_limit_requires_cgroup() {
        let err = parse(
            ["--climit-elapsed-max", "100000", "--", "/bin/true"]
                .iter()
                .map(|s| s.to_string()),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "enable cgroup to limit time");
    }

    #[test]
    fn elapsed_limits_after_cgroup() {
        let config = parse_run(&[
            "--cgroup", "g", "--climit-elapsed-high", "1000", "--climit-elapsed-max", "2000",
            "--", "/bin/true",
        ]);
        assert_eq!(config.wall_high_usecs, Some(1000));
        assert_eq!(config.wall_max_usecs, Some(2000));
    }

    #[test]
    fn negative_threshold_disables() {
        let config = parse_run(&["--cgroup", "g", "--climit", "time.max", "-1", "--", "/bin/true"]);
        assert_eq!(config.cpu_max_usecs, None);
    }

    #[test]
    fn ids_default_to_unchanged() {
        let config = parse_run(&["--", "/bin/true"]);
        assert_eq!(config.exec_uid, None);
        assert_eq!(config.exec_gid, None);

        let config = parse_run(&["--setuid", "1000", "--setgid", "100", "--", "/bin/true"]);
        assert_eq!(config.exec_uid, Some(1000));
        assert_eq!(config.exec_gid, Some(100));
    }

    #[test]
    fn missing_value_is_an_error() {
        let err = parse(["--climit", "memory.max"].iter().map(|s| s.to_string())).unwrap_err();
        assert!(err.to_string().contains("--climit needs a value"));
    }

    #[test]
    fn independent_limit_flags_commute() {
        let a = parse_run(&[
            "--rlimit", "nofile.max", "16", "--rlimit", "core.high", "0", "--", "/bin/true",
        ]);
        let b = parse_run(&[
            "--rlimit", "core.high", "0", "--rlimit", "nofile.max", "16", "--", "/bin/true",
        ]);
        let key =
            |r: &crate::rlimit::Rule| (r.name.clone(), r.field == crate::rlimit::Field::Hard, r.value);
        let mut ka: Vec<_> = a.exec_limits.iter().map(key).collect();
        let mut kb: Vec<_> = b.exec_limits.iter().map(key).collect();
        ka.sort();
        kb.sort();
        assert_eq!(ka, kb);
    }
}
