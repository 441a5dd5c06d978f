use procproxy_controller::{binary_name, resolve_binary, SUPPORTED_TARGETS};

use crate::cmd::TargetsArgs;
use crate::exit::{proxy_error, CliResult, SUCCESS};
use crate::output::{print_targets, OutputFormat, TargetOutput};

pub fn run(args: TargetsArgs, format: OutputFormat) -> CliResult<i32> {
    let mut targets = Vec::with_capacity(SUPPORTED_TARGETS.len());
    for &(os, arch) in SUPPORTED_TARGETS {
        let binary = binary_name(os, arch).map_err(|err| proxy_error("naming failed", err))?;
        let path = match &args.root {
            Some(root) => Some(
                resolve_binary(root, os, arch)
                    .map_err(|err| proxy_error("resolution failed", err))?
                    .display()
                    .to_string(),
            ),
            None => None,
        };
        targets.push(TargetOutput {
            os,
            arch,
            binary,
            path,
        });
    }

    print_targets(&targets, format);
    Ok(SUCCESS)
}
