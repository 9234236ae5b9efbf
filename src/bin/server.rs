/* This file is part of covertun.
 *
 * covertun is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * covertun is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with covertun.  If not, see <http://www.gnu.org/licenses/>.
 */

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use covertun::acceptor::accept_loop;
use covertun::cipher::Cipher;
use covertun::config::{ServerConfig, ServerOverrides};
use covertun::server_flow;

#[derive(Parser)]
#[command(name = "covertun-server", version, about = "Remote egress dialer for the covertun encrypted tunnel")]
struct Args {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address this server listens on for client tunnels.
    #[arg(long)]
    listen: Option<String>,

    /// Encryption method: "aes" or "dummy".
    #[arg(long)]
    method: Option<String>,

    /// Pre-shared key, passed through MD5 to derive the AES-128 key.
    #[arg(long)]
    key: Option<String>,

    /// Log level: debug, info, warn, or error.
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ServerConfig::load(args.config.as_deref(), ServerOverrides {
        listen_addr: args.listen,
        method: args.method,
        key: args.key,
        log_level: args.log_level,
    })?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_level))
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(run(config))
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let cipher = Arc::new(Cipher::new(config.method, &config.key));

    let listener = match TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind on {}: {err}", config.listen_addr);
            std::process::exit(1);
        }
    };
    info!("covertun server listening on {}", config.listen_addr);

    let err = accept_loop(&listener, |sock, addr| {
        let cipher = cipher.clone();
        async move {
            info!("accepted tunnel connection from {addr}");
            tokio::spawn(server_flow::run(sock, cipher));
        }
    }).await;

    error!("accept loop terminated: {err}");
    std::process::exit(1);
}
