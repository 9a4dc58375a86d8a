//! Mock printable-character-counting client for integration testing
//!
//! Usage: `mock-client <server_ip> <server_port> <file_path>`
//!
//! Streams the file to the server and prints the printable character count
//! it answers with. Exits 1 with a diagnostic on stderr when the file is
//! missing or empty, or the connection fails.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::process::exit;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 4 {
        eprintln!("Usage: {} <server_ip> <server_port> <file_path>", args[0]);
        exit(1);
    }
    let (address, port, path) = (&args[1], &args[2], &args[3]);

    let port: u16 = port.parse().unwrap_or_else(|e| fail("Invalid port", e));
    let contents = std::fs::read(path).unwrap_or_else(|e| fail("Error opening file", e));
    if contents.is_empty() {
        eprintln!("Error: file '{}' is empty", path);
        exit(1);
    }
    let size = u32::try_from(contents.len()).unwrap_or_else(|e| fail("File too large", e));

    let mut stream = TcpStream::connect((address.as_str(), port))
        .unwrap_or_else(|e| fail("Error connecting to server", e));

    stream
        .write_all(&size.to_be_bytes())
        .unwrap_or_else(|e| fail("Error sending file size", e));
    stream
        .write_all(&contents)
        .unwrap_or_else(|e| fail("Error sending file content", e));

    let mut reply = [0u8; 4];
    stream
        .read_exact(&mut reply)
        .unwrap_or_else(|e| fail("Error receiving printable character count", e));

    println!("# of printable characters: {}", u32::from_be_bytes(reply));
}

fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", context, err);
    exit(1);
}
