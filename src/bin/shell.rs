//! Interactive line-reader that drives a [`Client`] end to end: `get`,
//! `set`, `run`, `poll`, printing `data`/`msg` events as they arrive.
//! An external collaborator, not part of the library's own surface.

use std::io::{self, BufRead, Write};
use std::sync::mpsc;

use clap::Parser;
use color_eyre::eyre::bail;
use color_eyre::Result;

use ifconnect::{Client, Config, Event, EventKind, Value};

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    #[clap(short, long, help = "connect directly instead of waiting for a broadcast")]
    host: Option<String>,

    #[clap(short, long, help = "override the fixed protocol port")]
    port: Option<u16>,

    #[clap(long, help = "enable TCP keepalive on both sessions")]
    keep_alive: bool,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let args = Args::parse();
    let mut config = Config::default();
    config.host = args.host;
    config.port = args.port;
    config.keep_alive = args.keep_alive;

    let (ready_tx, ready_rx) = mpsc::channel();
    let client = Client::init(config, move |result| {
        let _ = ready_tx.send(result);
    });

    client.on(
        EventKind::Msg,
        Box::new(|event| {
            if let Event::Msg(msg) = event {
                println!("msg: {msg:?}");
            }
        }),
    );
    client.on(
        EventKind::Data,
        Box::new(|event| {
            if let Event::Data(data) = event {
                println!("data: {} = {:?}", data.command, data.data);
            }
        }),
    );

    match ready_rx.recv() {
        Ok(Ok(())) => println!("ready ({:?})", client.state()),
        Ok(Err(e)) => bail!("failed to connect: {e}"),
        Err(_) => bail!("engine thread exited before reporting readiness"),
    }

    println!("commands: get <name> | set <name> <value> | run <name> [k=v ...] | poll <name> | unpoll <name> | quit");
    let stdin = io::stdin();
    print!("> ");
    io::stdout().flush().ok();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut words = line.split_whitespace();
        match words.next() {
            Some("get") => {
                if let Some(name) = words.next() {
                    let name = name.to_string();
                    if let Err(e) = client.get(
                        name.clone(),
                        Some(Box::new(move |data| println!("{} = {:?}", data.command, data.data))),
                    ) {
                        eprintln!("get failed: {e}");
                    }
                }
            }
            Some("set") => {
                let name = words.next();
                let value = words.next();
                match (name, value) {
                    (Some(name), Some(value)) => {
                        if let Err(e) = client.set(name, Value::String(value.to_string())) {
                            eprintln!("set failed: {e}");
                        }
                    }
                    _ => eprintln!("usage: set <name> <value>"),
                }
            }
            Some("run") => {
                if let Some(name) = words.next() {
                    let kv_args: Vec<(String, String)> = words
                        .filter_map(|kv| kv.split_once('='))
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect();
                    if let Err(e) = client.run(name, kv_args) {
                        eprintln!("run failed: {e}");
                    }
                }
            }
            Some("poll") => {
                if let Some(name) = words.next() {
                    let name = name.to_string();
                    if let Err(e) = client.poll_register(
                        name.clone(),
                        Some(Box::new(move |data| println!("poll: {} = {:?}", data.command, data.data))),
                    ) {
                        eprintln!("poll failed: {e}");
                    }
                }
            }
            Some("unpoll") => {
                if let Some(name) = words.next() {
                    client.poll_deregister(name);
                }
            }
            Some("quit") => break,
            Some(other) => eprintln!("unknown command: {other}"),
            None => {}
        }
        print!("> ");
        io::stdout().flush().ok();
    }

    let (closed_tx, closed_rx) = mpsc::channel();
    client.close(move || {
        let _ = closed_tx.send(());
    });
    let _ = closed_rx.recv();
    Ok(())
}
