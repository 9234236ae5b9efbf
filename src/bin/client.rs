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
use covertun::client_flow;
use covertun::config::{ClientConfig, ClientOverrides};

#[derive(Parser)]
#[command(name = "covertun-client", version, about = "Local SOCKS5 front end for the covertun encrypted tunnel")]
struct Args {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address the local SOCKS5 server listens on.
    #[arg(long)]
    listen: Option<String>,

    /// Address of the remote covertun server.
    #[arg(long)]
    relay: Option<String>,

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

    let config = ClientConfig::load(args.config.as_deref(), ClientOverrides {
        listen_addr: args.listen,
        relay_addr: args.relay,
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

async fn run(config: ClientConfig) -> anyhow::Result<()> {
    let cipher = Arc::new(Cipher::new(config.method, &config.key));
    let relay_addr = config.relay_addr;

    let listener = match TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind on {}: {err}", config.listen_addr);
            std::process::exit(1);
        }
    };
    info!("covertun client listening on {}, relaying to {relay_addr}", config.listen_addr);

    let err = accept_loop(&listener, |sock, addr| {
        let cipher = cipher.clone();
        let relay_addr = relay_addr.clone();
        async move {
            info!("accepted SOCKS5 client from {addr}");
            tokio::spawn(client_flow::run(sock, relay_addr, cipher));
        }
    }).await;

    error!("accept loop terminated: {err}");
    std::process::exit(1);
}
