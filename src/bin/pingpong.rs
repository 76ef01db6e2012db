//! Two-process demo: serve an add-one service, call it, notify it.
//!
//! ```text
//! pingpong serve demo --tick     # terminal 1
//! pingpong call demo 41          # terminal 2
//! pingpong notify demo 5         # terminal 2
//! ```

use std::time::Duration;

use clap::{Parser, Subcommand};
use shmrpc::{Client, ConnectConfig, Service, status};

const DEMO_SERVICE_ID: u32 = 1;
const METHOD_ADD_ONE: u32 = 7;
const NOTIFY_TICK: u32 = 99;

#[derive(Parser, Debug)]
#[command(name = "pingpong")]
#[command(about = "Demo client/server for the shmrpc transport")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the service until killed, answering method 7 with value + 1
    Serve {
        /// Service name
        name: String,
        /// Broadcast a tick notification every second
        #[arg(long)]
        tick: bool,
    },
    /// Call method 7 once and print the reply
    Call {
        /// Service name
        name: String,
        /// Value to send
        #[arg(default_value = "41")]
        value: u32,
        /// Call timeout in milliseconds
        #[arg(long, default_value = "2000")]
        timeout_ms: u64,
    },
    /// Send a one-way notification to the service
    Notify {
        /// Service name
        name: String,
        /// Value to send
        #[arg(default_value = "0")]
        value: u32,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::Serve { name, tick } => serve(&name, tick),
        Command::Call {
            name,
            value,
            timeout_ms,
        } => call(&name, value, timeout_ms),
        Command::Notify { name, value } => notify(&name, value),
    }
}

fn serve(name: &str, tick: bool) -> Result<(), Box<dyn std::error::Error>> {
    let service = Service::new(name);
    service.set_request_handler(|method_id, request| {
        if method_id != METHOD_ADD_ONE {
            return (status::INVALID_METHOD, Vec::new());
        }
        match <[u8; 4]>::try_from(request) {
            Ok(bytes) => {
                let value = u32::from_le_bytes(bytes);
                (status::SUCCESS, (value + 1).to_le_bytes().to_vec())
            }
            Err(_) => (status::INVALID_METHOD, Vec::new()),
        }
    });
    service.start()?;
    println!("serving \"{name}\"; kill me to stop");

    let mut count = 0u32;
    loop {
        std::thread::sleep(Duration::from_secs(1));
        if tick {
            count += 1;
            // Failure only means no client is keeping up; keep ticking.
            let _ = service.notify(DEMO_SERVICE_ID, NOTIFY_TICK, &count.to_le_bytes());
        }
    }
}

fn call(name: &str, value: u32, timeout_ms: u64) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::connect_with(name, &ConnectConfig::default())?;
    let reply = client.call(
        DEMO_SERVICE_ID,
        METHOD_ADD_ONE,
        &value.to_le_bytes(),
        Duration::from_millis(timeout_ms),
    )?;
    match <[u8; 4]>::try_from(reply.payload.as_slice()) {
        Ok(bytes) => println!(
            "{value} -> {} (status {})",
            u32::from_le_bytes(bytes),
            reply.status
        ),
        Err(_) => println!("unexpected reply payload: {:?}", reply.payload),
    }
    client.disconnect();
    Ok(())
}

fn notify(name: &str, value: u32) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::connect(name)?;
    client.notify(DEMO_SERVICE_ID, NOTIFY_TICK, &value.to_le_bytes())?;
    println!("notified \"{name}\"");
    client.disconnect();
    Ok(())
}
