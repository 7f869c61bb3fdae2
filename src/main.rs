use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use statfold::{Config, Connection, Core, FlushScheduler, MemoryBuffer};
use tracing::{info, warn};

const LISTEN_ADDRESS: &str = "0.0.0.0:8125";

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config {
        stream_cmd: "cat".to_string(),
        flush_interval: Duration::from_secs(10),
        ..Config::default()
    };
    let core = Arc::new(Core::new(config));
    let _scheduler = FlushScheduler::start(Arc::clone(&core));

    let listener = TcpListener::bind(LISTEN_ADDRESS)?;
    info!("Listening on {LISTEN_ADDRESS}");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let core = Arc::clone(&core);
                thread::spawn(move || serve(&core, stream));
            }
            Err(err) => warn!("Accept failed: {err}"),
        }
    }
    Ok(())
}

fn serve(core: &Core, mut stream: TcpStream) {
    let mut conn = Connection::new(MemoryBuffer::new());
    let mut chunk = [0_u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                conn.buffer_mut().feed(&chunk[..n]);
                if let Err(err) = core.handle_client_connect(&mut conn) {
                    warn!("Closing connection: {err}");
                    break;
                }
            }
            Err(err) => {
                warn!("Read failed: {err}");
                break;
            }
        }
    }
}
