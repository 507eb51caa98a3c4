// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Minimal subscriber: prints every message it receives to stdout. Run
// alongside demo_publisher.

use shmcast::Subscriber;

fn main() {
    env_logger::init();

    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(9000);

    let mut subscriber = Subscriber::new(port, |msg: &[u8]| {
        println!("{}", String::from_utf8_lossy(msg));
    });
    subscriber.init().expect("failed to connect to publisher");
    println!("subscribed to 127.0.0.1:{port}, press Ctrl-C to exit");

    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}
