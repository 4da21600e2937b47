use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

struct Client {
    framed: Framed<TcpStream, LinesCodec>,
}

impl Client {
    async fn connect(host: &str, port: u16) -> Self {
        let socket = TcpStream::connect((host, port)).await.expect("connect failed");
        Self {
            framed: Framed::new(socket, LinesCodec::new()),
        }
    }

    async fn call(&mut self, request: Value) -> Value {
        self.framed.send(request.to_string()).await.expect("send failed");
        let line = self
            .framed
            .next()
            .await
            .expect("server closed connection")
            .expect("read failed");
        serde_json::from_str(&line).expect("bad response")
    }

    async fn ok(&mut self, request: Value) -> Value {
        let reply = self.call(request).await;
        assert_eq!(reply["ok"], json!(true), "request failed: {reply}");
        reply["data"].clone()
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().map_or(0.0, |d| d.as_secs_f64() * 1000.0),
    );
}

/// Each caller gets its own far-future date so runs never collide.
fn bench_date(offset: u64) -> String {
    let base = NaiveDate::from_ymd_opt(2100, 1, 1).expect("valid date");
    let seed = std::process::id() as u64 % 10_000;
    base.checked_add_days(Days::new(seed * 100 + offset))
        .expect("date in range")
        .to_string()
}

async fn register(client: &mut Client, op: &str, name: &str) -> String {
    let data = client
        .ok(json!({"op": op, "name": name, "swim_styles": ["Freestyle", "Backstroke"]}))
        .await;
    data["id"].as_str().expect("id").to_string()
}

/// Generate a full day of group slots; returns their ids.
async fn group_day(client: &mut Client, instructor_id: &str, date: &str) -> Vec<String> {
    let data = client
        .ok(json!({
            "op": "generate_slots", "instructor_id": instructor_id, "date": date,
            "start_time": "06:00", "end_time": "22:00", "lesson_type": "group"
        }))
        .await;
    data.as_array()
        .expect("slots")
        .iter()
        .map(|s| s["id"].as_str().expect("id").to_string())
        .collect()
}

async fn phase1_sequential(host: &str, port: u16) {
    let mut client = Client::connect(host, port).await;
    let instructor = register(&mut client, "register_instructor", "Bench Instructor").await;
    let slots = group_day(&mut client, &instructor, &bench_date(1)).await;

    let n = 2000;
    let mut swimmers = Vec::with_capacity(n);
    for i in 0..n {
        swimmers.push(register(&mut client, "register_swimmer", &format!("Swimmer {i}")).await);
    }

    let mut latencies = Vec::with_capacity(n);
    let mut booked = 0;
    let start = Instant::now();
    for (i, swimmer) in swimmers.iter().enumerate() {
        let slot = &slots[i % slots.len()];
        let t = Instant::now();
        let reply = client
            .call(json!({
                "op": "book_lesson", "swimmer_id": swimmer,
                "time_slot_id": slot, "swim_style": "Freestyle"
            }))
            .await;
        latencies.push(t.elapsed());
        if reply["ok"] == json!(true) {
            booked += 1;
        }
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!(
        "  {n} booking attempts ({booked} seated) in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    print_latency("booking latency", &mut latencies);
}

async fn phase2_last_seat_race(host: &str, port: u16) {
    let mut setup = Client::connect(host, port).await;
    let instructor = register(&mut setup, "register_instructor", "Race Instructor").await;
    let slot = setup
        .ok(json!({
            "op": "create_slot", "instructor_id": instructor, "date": bench_date(2),
            "start_time": "12:00", "end_time": "12:45", "max_capacity": 1
        }))
        .await;
    let slot_id = slot["id"].as_str().expect("id").to_string();

    let n_tasks = 64;
    let booked = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..n_tasks {
        let host = host.to_string();
        let slot_id = slot_id.clone();
        let booked = booked.clone();
        let rejected = rejected.clone();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            let swimmer = register(&mut client, "register_swimmer", &format!("Racer {i}")).await;
            let reply = client
                .call(json!({
                    "op": "book_lesson", "swimmer_id": swimmer,
                    "time_slot_id": slot_id, "swim_style": "Freestyle"
                }))
                .await;
            if reply["ok"] == json!(true) {
                booked.fetch_add(1, Ordering::Relaxed);
            } else if reply["error"]["kind"] == json!("capacity") {
                rejected.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }
    for h in handles {
        h.await.expect("task panicked");
    }

    let booked = booked.load(Ordering::Relaxed);
    let rejected = rejected.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} racers on one seat in {:.2}s: {booked} booked, {rejected} rejected",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(booked, 1, "exactly one racer must win the last seat");
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let date = bench_date(3);
    let mut setup = Client::connect(host, port).await;
    for i in 0..10 {
        let instructor = register(&mut setup, "register_instructor", &format!("Coach {i}")).await;
        group_day(&mut setup, &instructor, &date).await;
    }
    drop(setup);

    // Writers keep creating and booking on their own days in the background
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5u64 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            let instructor = register(&mut client, "register_instructor", "Writer").await;
            let swimmer = register(&mut client, "register_swimmer", "Writer Swimmer").await;
            let mut day = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let slots = group_day(&mut client, &instructor, &bench_date(10 + w * 10 + day % 10)).await;
                for slot in slots {
                    let _ = client
                        .call(json!({
                            "op": "book_lesson", "swimmer_id": swimmer,
                            "time_slot_id": slot, "swim_style": "Backstroke"
                        }))
                        .await;
                }
                day += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let host = host.to_string();
        let date = date.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .ok(json!({"op": "get_available_slots", "date": date, "swim_style": "Freestyle"}))
                    .await;
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.expect("reader panicked"));
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("available-slots query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            for i in 0..ops_per_conn {
                register(&mut client, "register_swimmer", &format!("Storm {i}")).await;
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("SWIMSLOT_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("SWIMSLOT_PORT")
        .unwrap_or_else(|_| "7878".into())
        .parse()
        .expect("invalid SWIMSLOT_PORT");

    println!("=== swimslot stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] last-seat race");
    phase2_last_seat_race(&host, port).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== done ===");
}
