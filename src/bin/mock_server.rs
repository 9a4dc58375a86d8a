//! Mock printable-character-counting server for integration testing
//!
//! Usage: `mock-server <port>`
//!
//! Each connection sends a big-endian `u32` length followed by that many
//! bytes; the server answers with a big-endian `u32` count of printable
//! bytes (32..=126). On SIGINT it stops accepting, lets in-flight
//! connections finish, prints per-character totals and exits 0.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

const PRINTABLE_MIN: u8 = 32;
const PRINTABLE_MAX: u8 = 126;
const NUM_PRINTABLE: usize = (PRINTABLE_MAX - PRINTABLE_MIN + 1) as usize;
const BUFFER_SIZE: usize = 1024;

type Totals = Arc<Mutex<[u64; NUM_PRINTABLE]>>;

#[cfg(not(unix))]
fn main() {
    eprintln!("mock-server needs Unix signal handling");
    std::process::exit(1);
}

#[cfg(unix)]
#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <server_port>", args[0]);
        std::process::exit(1);
    }
    let port: u16 = match args[1].parse() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Invalid port '{}': {}", args[1], e);
            std::process::exit(1);
        }
    };

    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .unwrap_or_else(|e| {
            eprintln!("Error setting up SIGINT handler: {}", e);
            std::process::exit(1);
        });

    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Error binding socket: {}", e);
            std::process::exit(1);
        }
    };
    println!("listening on port {}", port);

    let totals: Totals = Arc::new(Mutex::new([0; NUM_PRINTABLE]));
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = sigint.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    println!("accepted connection from {}", peer);
                    connections.spawn(handle_connection(stream, totals.clone()));
                }
                Err(e) => eprintln!("Error accepting connection: {}", e),
            },
            // Reap finished connections so the set does not grow unbounded
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}

    let totals = totals.lock().map(|t| *t).unwrap_or([0; NUM_PRINTABLE]);
    for (i, count) in totals.iter().enumerate() {
        println!("char '{}' : {} times", (PRINTABLE_MIN + i as u8) as char, count);
    }
}

#[cfg_attr(not(unix), allow(dead_code))]
async fn handle_connection(mut stream: TcpStream, totals: Totals) {
    let mut header = [0u8; 4];
    if let Err(e) = stream.read_exact(&mut header).await {
        eprintln!("Client closed the connection before sending a size: {}", e);
        return;
    }
    let mut remaining = u32::from_be_bytes(header) as usize;

    let mut local = [0u64; NUM_PRINTABLE];
    let mut printable: u32 = 0;
    let mut buffer = [0u8; BUFFER_SIZE];

    while remaining > 0 {
        let want = remaining.min(BUFFER_SIZE);
        match stream.read(&mut buffer[..want]).await {
            Ok(0) => {
                eprintln!("Client closed the connection unexpectedly");
                return;
            }
            Ok(n) => {
                for &b in &buffer[..n] {
                    if (PRINTABLE_MIN..=PRINTABLE_MAX).contains(&b) {
                        local[(b - PRINTABLE_MIN) as usize] += 1;
                        printable += 1;
                    }
                }
                remaining -= n;
            }
            Err(e) => {
                eprintln!("Error receiving file content: {}", e);
                return;
            }
        }
    }

    if let Err(e) = stream.write_all(&printable.to_be_bytes()).await {
        eprintln!("Error sending printable character count: {}", e);
        return;
    }

    // Only fully served clients count towards the totals
    if let Ok(mut totals) = totals.lock() {
        for (total, n) in totals.iter_mut().zip(local) {
            *total += n;
        }
    }
}
