//! Per-process rlimit rules of the form `RESOURCE.high` / `RESOURCE.max`.
//!
//! `high` adjusts the soft limit (`rlim_cur`), `max` the hard limit
//! (`rlim_max`). Rules are validated at parse time so bad input fails
//! before any cgroup exists, and applied in the process that is about to
//! exec bwrap.

use tracing::debug;

use crate::error::{last_errno, Error};
use crate::Result;

/// Canonical resource names in kernel id order (0..=15).
const RESOURCES: [(&str, libc::__rlimit_resource_t); 16] = [
    ("cpu", libc::RLIMIT_CPU),
    ("fsize", libc::RLIMIT_FSIZE),
    ("data", libc::RLIMIT_DATA),
    ("stack", libc::RLIMIT_STACK),
    ("core", libc::RLIMIT_CORE),
    ("rss", libc::RLIMIT_RSS),
    ("nproc", libc::RLIMIT_NPROC),
    ("nofile", libc::RLIMIT_NOFILE),
    ("memlock", libc::RLIMIT_MEMLOCK),
    ("as", libc::RLIMIT_AS),
    ("locks", libc::RLIMIT_LOCKS),
    ("sigpending", libc::RLIMIT_SIGPENDING),
    ("msgqueue", libc::RLIMIT_MSGQUEUE),
    ("nice", libc::RLIMIT_NICE),
    ("rtprio", libc::RLIMIT_RTPRIO),
    ("rttime", libc::RLIMIT_RTTIME),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// `.high` — soft limit
    Soft,
    /// `.max` — hard limit
    Hard,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    resource: libc::__rlimit_resource_t,
    pub field: Field,
    pub value: u64,
}

/// Parse `RESOURCE.high|max` plus a decimal value into a [`Rule`].
pub fn parse_rule(var: &str, value: &str) -> Result<Rule> {
    let Some((name, suffix)) = var.rsplit_once('.') else {
        return Err(Error::Parse(format!(
            "bad rlimit {var:?}: expected RESOURCE.high or RESOURCE.max"
        )));
    };
    let field = match suffix {
        "high" => Field::Soft,
        "max" => Field::Hard,
        _ => {
            return Err(Error::Parse(format!(
                "bad rlimit suffix {suffix:?} in {var:?}: expected high or max"
            )))
        }
    };
    let Some(&(name, resource)) = RESOURCES.iter().find(|(n, _)| *n == name) else {
        return Err(Error::Parse(format!("unknown rlimit resource {name:?}")));
    };
    let value = value
        .parse()
        .map_err(|_| Error::Parse(format!("bad rlimit value {value:?} for {var}")))?;
    Ok(Rule {
        name: name.to_string(),
        resource,
        field,
        value,
    })
}

/// The untouched half of the pair is preserved; lowering the hard limit
/// drags the soft limit down with it so the pair stays ordered.
fn updated(mut rlim: libc::rlimit, field: Field, value: u64) -> libc::rlimit {
    match field {
        Field::Soft => rlim.rlim_cur = value,
        Field::Hard => {
            rlim.rlim_max = value;
            if rlim.rlim_cur > rlim.rlim_max {
                rlim.rlim_cur = rlim.rlim_max;
            }
        }
    }
    rlim
}

/// Apply rules in supplied order via getrlimit/setrlimit.
pub fn apply(rules: &[Rule]) -> Result<()> {
    for rule in rules {
        let mut rlim = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: rlim is a valid out-pointer, resource a valid constant.
        if unsafe { libc::getrlimit(rule.resource, &mut rlim) } != 0 {
            return Err(Error::Rlimit {
                call: "getrlimit",
                resource: rule.name.clone(),
                errno: last_errno(),
            });
        }
        let rlim = updated(rlim, rule.field, rule.value);
        // SAFETY: rlim is valid and initialized.
        if unsafe { libc::setrlimit(rule.resource, &rlim) } != 0 {
            return Err(Error::Rlimit {
                call: "setrlimit",
                resource: rule.name.clone(),
                errno: last_errno(),
            });
        }
        debug!(
            resource = %rule.name,
            soft = rlim.rlim_cur,
            hard = rlim.rlim_max,
            "applied rlimit"
        );
    }
    Ok(())
}
