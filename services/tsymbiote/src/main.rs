// tsymbiote: fleet introspection over an overlay mesh.
//
// Two subcommands share one binary: `adapter` runs the per-host sidecar,
// `webui` runs the browser-facing fan-out server.

use adapter::config::AdapterConfig;
use clap::{Arg, ArgAction, Command};
use rand::distr::Alphanumeric;
use rand::Rng;
use tracing::info;
use ts_core::ServerConfig;
use webui::config::WebUiConfig;

fn validate_port_value(value: &str) -> Result<u16, String> {
    value.parse::<u16>().map_err(|_| "Invalid port number".to_owned())
}

fn common_args(cmd: Command, hostname_prefix_default: &'static str) -> Command {
    cmd.arg(
        Arg::new("port")
            .help("The port to expose the service on")
            .short('p')
            .long("port")
            .value_parser(validate_port_value)
            .default_value("3621"),
    )
    .arg(
        Arg::new("hostname")
            .help("Used to set a static hostname. If not set hostname-prefix will be used")
            .long("hostname"),
    )
    .arg(
        Arg::new("hostname_prefix")
            .help("A prefix to assign to the overlay hostname, a random suffix is appended")
            .long("hostname-prefix")
            .default_value(hostname_prefix_default),
    )
    .arg(
        Arg::new("dev")
            .help("Run over plain HTTP on loopback with authentication disabled")
            .long("dev")
            .action(ArgAction::SetTrue),
    )
    .arg(
        Arg::new("logout")
            .help("Log out of the overlay on exit, expiring this node's key")
            .long("logout")
            .action(ArgAction::SetTrue),
    )
}

fn server_config(matches: &clap::ArgMatches) -> ServerConfig {
    let prefix = matches
        .get_one::<String>("hostname_prefix")
        .expect("hostname-prefix has a default");
    let hostname = match matches.get_one::<String>("hostname") {
        Some(hostname) if !hostname.is_empty() => hostname.clone(),
        _ => format!("{}-{}", prefix, random_suffix()),
    };

    ServerConfig {
        port: *matches.get_one::<u16>("port").expect("port has a default"),
        hostname,
        dev: matches.get_flag("dev"),
        logout: matches.get_flag("logout"),
    }
}

fn random_suffix() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(6)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let matches = Command::new("tsymbiote")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Fleet introspection over an overlay mesh")
        .subcommand_required(true)
        .subcommand(
            common_args(
                Command::new("adapter")
                    .about("A sidecar that runs daemon LocalAPI calls as the host"),
                "tsymbiote-adapter",
            )
            .arg(
                Arg::new("allowed_tag")
                    .help("Overlay tag required of callers. This cannot be an empty string")
                    .long("allowed-tag")
                    .default_value("tag:tsymbiote-webui"),
            )
            .arg(
                Arg::new("socket")
                    .help("Path to the overlay daemon socket")
                    .long("socket"),
            )
            .arg(
                Arg::new("discover_socket")
                    .help("Probe well-known socket paths (meant for k8s sidecar deployment)")
                    .short('d')
                    .long("discover-socket")
                    .action(ArgAction::SetTrue),
            ),
        )
        .subcommand(
            common_args(
                Command::new("webui").about("The control plane for interacting with the symbionts"),
                "tsymbiote-webui",
            )
            .arg(
                Arg::new("allowed_users")
                    .help("Comma separated allowed users, e.g. user.one@email.com,user.two@email.com")
                    .long("allowed-users")
                    .value_delimiter(','),
            )
            .arg(
                Arg::new("scopes")
                    .help("Control-plane OAuth scopes")
                    .long("scopes")
                    .value_delimiter(',')
                    .default_values(["auth_keys", "devices:core:read"]),
            )
            .arg(
                Arg::new("generate_auth")
                    .help("Generate an auth key through the control plane at startup")
                    .long("generate-auth")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("adapter_port")
                    .help("The port adapters are running on, they must all use the same port")
                    .long("adapter-port")
                    .value_parser(validate_port_value)
                    .default_value("3621"),
            ),
        )
        .get_matches();

    info!(version = env!("CARGO_PKG_VERSION"), "tsymbiote starting");

    match matches.subcommand() {
        Some(("adapter", sub)) => {
            let cfg = AdapterConfig {
                server: server_config(sub),
                allowed_tag: sub
                    .get_one::<String>("allowed_tag")
                    .cloned()
                    .unwrap_or_default(),
                socket: sub.get_one::<String>("socket").map(Into::into),
                discover_socket: sub.get_flag("discover_socket"),
            };
            if let Err(e) = adapter::run(cfg).await {
                eprintln!("FATAL: {}", e);
                std::process::exit(1);
            }
        }
        Some(("webui", sub)) => {
            let cfg = WebUiConfig {
                server: server_config(sub),
                allowed_users: sub
                    .get_many::<String>("allowed_users")
                    .map(|users| users.cloned().collect())
                    .unwrap_or_default(),
                scopes: sub
                    .get_many::<String>("scopes")
                    .map(|scopes| scopes.cloned().collect())
                    .unwrap_or_default(),
                generate_auth: sub.get_flag("generate_auth"),
                adapter_port: *sub
                    .get_one::<u16>("adapter_port")
                    .expect("adapter-port has a default"),
            };
            if let Err(e) = webui::run(cfg).await {
                eprintln!("FATAL: {}", e);
                std::process::exit(1);
            }
        }
        _ => unreachable!("subcommand is required"),
    }
}
