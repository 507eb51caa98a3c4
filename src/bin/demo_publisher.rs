// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Minimal publisher: reads lines from stdin and fans each one out to every
// connected subscriber. Run alongside demo_subscriber.

use std::io::BufRead;

use shmcast::Publisher;

fn main() {
    env_logger::init();

    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(9000);
    let buffer_size: usize = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(4096);

    let mut publisher = Publisher::new(port, buffer_size);
    publisher.init().expect("failed to bind publisher");
    println!("publisher listening on 127.0.0.1:{port}, type a line and press enter to publish");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        match publisher.publish(line.as_bytes()) {
            Ok(()) => {}
            Err(e) => eprintln!("publish failed: {e}"),
        }
    }
}
