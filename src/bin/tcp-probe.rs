//! Command-line client for poking a running tcp-shell server.
//!
//! ```text
//! tcp-probe --addr 127.0.0.1:8991 hello quit
//! ```

use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Parser)]
#[command(name = "tcp-probe")]
#[command(about = "Send messages to a tcp-shell server and print what comes back", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "127.0.0.1:8991")]
    addr: String,

    /// Milliseconds to wait for each reply.
    #[arg(short, long, default_value_t = 1000)]
    wait_ms: u64,

    /// Messages to send, one per write. `quit` asks the echo server to hang up.
    messages: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut stream = TcpStream::connect(&cli.addr).await?;
    let wait = Duration::from_millis(cli.wait_ms);
    let mut buf = vec![0u8; 4096];

    for message in &cli.messages {
        stream.write_all(message.as_bytes()).await?;

        match tokio::time::timeout(wait, stream.read(&mut buf)).await {
            Ok(Ok(0)) => {
                println!("<closed by server>");
                return Ok(());
            }
            Ok(Ok(n)) => println!("{}", String::from_utf8_lossy(&buf[..n])),
            Ok(Err(e)) => {
                eprintln!("Error: read failed: {}", e);
                return Ok(());
            }
            Err(_) => println!("<no reply within {:?}>", wait),
        }
    }

    // Drain until the server hangs up or goes quiet.
    loop {
        match tokio::time::timeout(wait, stream.read(&mut buf)).await {
            Ok(Ok(0)) => {
                println!("<closed by server>");
                break;
            }
            Ok(Ok(n)) => println!("{}", String::from_utf8_lossy(&buf[..n])),
            Ok(Err(_)) | Err(_) => break,
        }
    }

    Ok(())
}
