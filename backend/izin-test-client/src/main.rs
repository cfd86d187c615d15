// src/main.rs

use chrono::{DateTime, FixedOffset, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::error::Error;

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct Student {
    id: String,
    name: String,
    class: String,
}

const DEFAULT_UTC_OFFSET_HOURS: i32 = 8;

/// The server's calendar day at `now`, using its fixed UTC offset.
fn school_today(now: DateTime<Utc>, offset_hours: i32) -> Option<String> {
    let offset = FixedOffset::east_opt(offset_hours.checked_mul(3600)?)?;
    Some(now.with_timezone(&offset).format("%Y-%m-%d").to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let base_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:3000".to_string());
    let client = Client::new();

    // Test 1: Health check
    println!("\n🔍 Testing health check endpoint...");
    let health_response = client
        .get(format!("{}/health", base_url))
        .send()
        .await?
        .json::<HealthResponse>()
        .await?;
    println!("Health check response: {:?}", health_response);

    // Test 2: Student roster
    println!("\n🔍 Fetching student roster...");
    let roster_response = client
        .get(format!("{}/api/students", base_url))
        .send()
        .await?;
    println!("Roster status: {}", roster_response.status());
    if !roster_response.status().is_success() {
        println!("Roster body: {}", roster_response.text().await?);
        return Ok(());
    }
    let students = roster_response.json::<Vec<Student>>().await?;
    println!("Roster has {} students", students.len());
    for student in students.iter().take(5) {
        println!("  {} | {} | {}", student.id, student.name, student.class);
    }

    let Some(student) = students.first() else {
        println!("\n⚠️ Roster is empty, skipping leave submission");
        return Ok(());
    };

    // Test 3: Suggestions for the first student's name
    let prefix: String = student.name.chars().take(2).collect();
    println!("\n🔍 Testing suggestions for '{}'...", prefix);
    let suggest_response = client
        .get(format!("{}/api/students/suggest", base_url))
        .query(&[("q", prefix.as_str()), ("limit", "5")])
        .send()
        .await?;
    println!("Suggest status: {}", suggest_response.status());
    println!("Suggest body: {}", suggest_response.text().await?);

    // Test 4: Leave submission for today
    let offset_hours = std::env::var("IZIN_UTC_OFFSET_HOURS")
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(DEFAULT_UTC_OFFSET_HOURS);
    let today = school_today(Utc::now(), offset_hours).ok_or("invalid IZIN_UTC_OFFSET_HOURS")?;
    println!("\n🔍 Submitting sick leave for {} on {}...", student.name, today);
    let submit_response = client
        .post(format!("{}/api/leave", base_url))
        .json(&json!({
            "student": student.id,
            "studentName": student.name,
            "className": student.class,
            "date": today,
            "leaveType": "sick",
            "note": "Smoke test submission"
        }))
        .send()
        .await?;
    println!("Submit status: {}", submit_response.status());
    println!("Submit body: {}", submit_response.text().await?);

    println!("\n✅ Tests completed!");
    Ok(())
}
