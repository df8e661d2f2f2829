//! CLI command definition using `clap`

use clap::{Arg, ArgAction, Command as ClapCommand};
use warp_core::{
    manifest::DEFAULT_SYNC_IMAGE, session::DEFAULT_WORKDIR, sync::DEFAULT_RSYNC_ARGS,
};

pub fn after_help_text(examples: &[&str]) -> String {
    let mut text = String::from("EXAMPLES:\n");
    for example in examples {
        text.push_str("  ");
        text.push_str(example);
        text.push('\n');
    }
    text
}

#[allow(clippy::too_many_lines)]
pub fn build_cli() -> ClapCommand {
    ClapCommand::new("kubectl-warp")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Sync local files into a new Pod and run a command in it")
        .long_about(
            "Creates a Pod, copies the current directory into it with rsync and \
             attaches to the command running there. Local changes keep syncing \
             every second until the command exits. The Pod is deleted afterwards.",
        )
        .after_help(after_help_text(&[
            "kubectl warp demo --image busybox -- sleep 5",
            "kubectl warp build -i -t --image golang:1.21 -- go test ./...",
            "kubectl warp app --image node:20 --include 'src/***' --exclude '*' -- npm start",
        ]))
        .arg(
            Arg::new("name")
                .required(true)
                .value_name("NAME")
                .help("Name of the Pod (and of its secret)"),
        )
        .arg(
            Arg::new("command")
                .num_args(1..)
                .trailing_var_arg(true)
                .allow_hyphen_values(true)
                .value_name("COMMAND")
                .help("Command to run in the work container"),
        )
        .arg(
            Arg::new("image")
                .long("image")
                .required(true)
                .value_name("IMAGE")
                .help("Container image for the work container"),
        )
        .arg(
            Arg::new("stdin")
                .long("stdin")
                .short('i')
                .action(ArgAction::SetTrue)
                .help("Keep stdin open on the container"),
        )
        .arg(
            Arg::new("tty")
                .long("tty")
                .short('t')
                .action(ArgAction::SetTrue)
                .help("Allocate a TTY for the container"),
        )
        .arg(
            Arg::new("include")
                .long("include")
                .action(ArgAction::Append)
                .value_delimiter(',')
                .value_name("PATTERN")
                .help("rsync include pattern (repeatable, order matters)"),
        )
        .arg(
            Arg::new("exclude")
                .long("exclude")
                .action(ArgAction::Append)
                .value_delimiter(',')
                .value_name("PATTERN")
                .help("rsync exclude pattern (repeatable, order matters)"),
        )
        .arg(
            Arg::new("rsync-args")
                .long("rsync-args")
                .allow_hyphen_values(true)
                .default_value(DEFAULT_RSYNC_ARGS)
                .value_name("ARGS")
                .help("Arguments passed to rsync, separated by spaces"),
        )
        .arg(
            Arg::new("service-account-name")
                .long("service-account-name")
                .value_name("NAME")
                .help("Service account the Pod runs as"),
        )
        .arg(
            Arg::new("node-selector-keys")
                .long("node-selector-keys")
                .action(ArgAction::Append)
                .value_delimiter(',')
                .value_name("KEY")
                .help("Node selector label keys, paired with --node-selector-values"),
        )
        .arg(
            Arg::new("node-selector-values")
                .long("node-selector-values")
                .action(ArgAction::Append)
                .value_delimiter(',')
                .value_name("VALUE")
                .help("Node selector label values, paired with --node-selector-keys"),
        )
        .arg(
            Arg::new("namespace")
                .long("namespace")
                .short('n')
                .value_name("NAMESPACE")
                .help("Namespace for the Pod (default: current context's namespace)"),
        )
        .arg(
            Arg::new("context")
                .long("context")
                .value_name("CONTEXT")
                .help("kubeconfig context to use"),
        )
        .arg(
            Arg::new("kubeconfig")
                .long("kubeconfig")
                .value_parser(clap::value_parser!(std::path::PathBuf))
                .value_name("PATH")
                .help("Path to the kubeconfig file"),
        )
        .arg(
            Arg::new("sync-image")
                .long("sync-image")
                .default_value(DEFAULT_SYNC_IMAGE)
                .value_name("IMAGE")
                .help("Image providing sshd and rsync for the sync containers"),
        )
        .arg(
            Arg::new("workdir")
                .long("workdir")
                .default_value(DEFAULT_WORKDIR)
                .value_name("PATH")
                .help("Directory in the Pod the files are synced to"),
        )
        .arg(
            Arg::new("wait-timeout")
                .long("wait-timeout")
                .value_parser(clap::value_parser!(u64).range(1..))
                .value_name("SECONDS")
                .help("Give up waiting for the Pod after this many seconds (default: wait forever)"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .action(ArgAction::SetTrue)
                .help("Log debug output and show rsync output"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_trailing_command_keeps_hyphens() {
        let matches = build_cli()
            .try_get_matches_from(["kubectl-warp", "demo", "--image", "busybox", "--", "ls", "-la"])
            .unwrap();
        let command: Vec<&String> = matches.get_many::<String>("command").unwrap().collect();
        assert_eq!(command, ["ls", "-la"]);
    }

    #[test]
    fn test_include_is_repeatable_and_comma_separated() {
        let matches = build_cli()
            .try_get_matches_from([
                "kubectl-warp",
                "demo",
                "--image",
                "busybox",
                "--include",
                "src/***,Cargo.toml",
                "--include",
                "README.md",
            ])
            .unwrap();
        let includes: Vec<&String> = matches.get_many::<String>("include").unwrap().collect();
        assert_eq!(includes, ["src/***", "Cargo.toml", "README.md"]);
    }

    #[test]
    fn test_image_is_required() {
        let err = build_cli()
            .try_get_matches_from(["kubectl-warp", "demo"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
