use std::{
    io::{Read, Write},
    thread,
    time::Duration,
};

use tcp_conn_pool::{ConnectionPool, Peer, PoolConfig};

// Sends a request over pooled connections from a few threads. Expects an
// HTTP server on 127.0.0.1:5000.
fn main() -> Result<(), tcp_conn_pool::PoolError> {
    let pool = ConnectionPool::new(
        Peer::new("127.0.0.1", 5000, 200),
        PoolConfig::new(Duration::from_secs(30)).pool_size(2),
    );

    let workers: Vec<_> = (0..4)
        .map(|id| {
            let pool = pool.clone();
            thread::spawn(move || -> Result<(), tcp_conn_pool::PoolError> {
                let mut conn = pool.checkout()?;
                let data = "GET /get HTTP/1.1\r\nHost: httpbin.org\r\n\r\n";
                // checkout already connected the socket
                let Some(mut socket) = conn.socket() else {
                    return Ok(());
                };
                if socket.write_all(data.as_bytes()).is_err() {
                    conn.set_reusable(false);
                    return Ok(());
                }

                thread::sleep(Duration::from_millis(50));
                let mut buf = [0u8; 4096];
                match socket.read(&mut buf) {
                    Ok(n) => println!("worker {id}: {} bytes", n),
                    Err(e) => {
                        println!("worker {id}: read error {e}");
                        conn.set_reusable(false);
                    }
                }
                Ok(())
            })
        })
        .collect();

    for worker in workers {
        if let Ok(Err(e)) = worker.join() {
            println!("worker failed: {e}");
        }
    }
    println!(
        "real size {}, idle size {}",
        pool.real_size(),
        pool.idle_size()
    );
    Ok(())
}
