use std::env;

use voice_rtc::config::load_config;
use voice_rtc::util::init_log;
use voice_rtc::{client, server};

fn main() {
    let args: Vec<String> = env::args().collect();

    let Some(command) = args.get(1) else {
        print_usage();
        return;
    };

    let path = args
        .get(2)
        .cloned()
        .or_else(|| env::var("VOICE_RTC_CONFIG").ok());
    let config = match load_config(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(2);
        }
    };
    init_log(&config.logging.level);

    let result = match command.as_str() {
        "server" => {
            println!("Starting credential issuer...");
            server::main(config.issuer)
        }
        "connect" => {
            println!("Starting voice session...");
            client::run(config.client)
        }
        _ => {
            print_usage();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error:\n{:#}", e);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("Voice RTC");
    println!("Usage:");
    println!("  voice-rtc server [config.toml]   - Start the local credential issuer");
    println!("  voice-rtc connect [config.toml]  - Open a voice session");
}
