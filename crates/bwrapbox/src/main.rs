//! bwrapbox - run bwrap under cgroup v2 and rlimit constraints.

use std::io::{self, Write as _};
use std::process;

use bwrapbox::config::{self, Parsed};
use bwrapbox::{spawn, supervisor};

const HELP: &str = "\
usage: bwrapbox [OPTIONS...] [--] COMMAND [ARGS...]

Runs bwrap under kernel resource constraints. Options bwrapbox does not
recognize are passed through to bwrap unchanged.

    --help                      print this help, then bwrap's
    --cgroup NAME               enable cgroup mode; NAME is absolute or
                                relative to /sys/fs/cgroup
    --cgroup-overwrite          tear the cgroup down first if it exists
    --climit VAR VALUE          cgroup limit written to <cgroup>/VAR;
                                time.high and time.max instead set the
                                CPU-time watchdog (usecs, SIGXCPU/SIGKILL)
    --rlimit VAR VALUE          process limit, VAR = RESOURCE.high|max
    --climit-elapsed-high USECS wall-clock soft limit (SIGXCPU)
    --climit-elapsed-max USECS  wall-clock hard limit (SIGKILL)
    --setuid UID                switch uid before exec
    --setgid GID                switch gid before exec
    --quiet                     suppress the final summary line
";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let result = match config::parse(std::env::args().skip(1)) {
        Ok(Parsed::Help) => {
            print!("{HELP}");
            io::stdout().flush().ok();
            Err(spawn::exec_bwrap(&config::help_argv()))
        }
        Ok(Parsed::Run(config)) => supervisor::run(config),
        Err(err) => Err(err),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("bwrapbox: {err}");
            process::exit(255);
        }
    }
}
