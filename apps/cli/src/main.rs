use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docstore::{GatewayStore, MemoryStore};
use futures::StreamExt;
use serde_json::{Map, Value};
use shared::{
    domain::{
        Appointment, AppointmentPatch, Doctor, DocumentId, Record, StatusBucket,
        APPOINTMENTS_COLLECTION, DOCTORS_COLLECTION,
    },
    protocol::{QueryDescriptor, RawDocument},
};
use sync_core::{view, ListView, LiveSubscription, SyncClient};
use tracing::info;

mod config;

#[derive(Parser)]
#[command(name = "medilink", about = "MediLink live-sync diagnostics")]
struct Cli {
    /// Gateway base url, overriding medilink.toml and MEDILINK__GATEWAY_URL.
    #[arg(long)]
    gateway: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a seeded in-memory walkthrough of the live appointment list.
    Demo,
    /// Tail one collection through the sync gateway until it ends.
    Watch {
        #[arg(long, default_value = "appointments")]
        collection: String,
        #[arg(long, default_value = "timestamp")]
        order_by: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = config::load_settings();
    tracing_subscriber::fmt()
        .with_env_filter(settings.log_filter.as_str())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Demo => run_demo().await,
        Command::Watch {
            collection,
            order_by,
        } => {
            let gateway = cli.gateway.unwrap_or(settings.gateway_url);
            run_watch(&gateway, collection, order_by).await
        }
    }
}

async fn run_demo() -> Result<()> {
    let store = MemoryStore::new();

    store
        .add(
            DOCTORS_COLLECTION,
            doctor_fields("Dr. Achieng Odhiambo", "Cardiology", "12 years"),
        )
        .await;
    store
        .add(
            DOCTORS_COLLECTION,
            doctor_fields("Dr. Brian Mwangi", "Pediatrics", "7 years"),
        )
        .await;

    let checkup = store
        .add(
            APPOINTMENTS_COLLECTION,
            appointment_fields(
                "Dr. Achieng Odhiambo",
                "2025-06-10",
                "09:00",
                "annual checkup",
                "upcoming",
                "2025-06-10T09:00:00Z",
            ),
        )
        .await;
    let cleaning = store
        .add(
            APPOINTMENTS_COLLECTION,
            appointment_fields(
                "Dr. Brian Mwangi",
                "2025-06-17",
                "11:30",
                "dental cleaning",
                "upcoming",
                "2025-06-17T11:30:00Z",
            ),
        )
        .await;
    store
        .add(
            APPOINTMENTS_COLLECTION,
            appointment_fields(
                "Dr. Achieng Odhiambo",
                "2025-05-02",
                "15:00",
                "blood pressure review",
                "past",
                "2025-05-02T15:00:00Z",
            ),
        )
        .await;

    let client = SyncClient::new(Arc::new(store));
    let mut appointments = client.subscribe::<Appointment>(Appointment::query());

    println!("initial appointment list");
    print_grouped(&wait_for_list(&mut appointments).await?);

    println!();
    println!("rescheduling the annual checkup");
    let patch = AppointmentPatch {
        appointment_date: Some("2025-06-12".to_string()),
        appointment_time: Some("14:30".to_string()),
        notes: Some("annual checkup, moved to the afternoon".to_string()),
    };
    client
        .update(APPOINTMENTS_COLLECTION, &checkup, patch.into_fields())
        .await
        .context("update appointment")?;
    print_grouped(&wait_for_list(&mut appointments).await?);

    println!();
    println!("cancelling the dental cleaning");
    client
        .delete(APPOINTMENTS_COLLECTION, &cleaning)
        .await
        .context("delete appointment")?;
    print_grouped(&wait_for_list(&mut appointments).await?);

    println!();
    println!("searching doctors for \"mwangi\"");
    let doctors: Vec<Doctor> = client.load(Doctor::query()).await.context("load doctors")?;
    for doctor in view::project(&doctors, |doctor| doctor.name_matches("mwangi")) {
        println!(
            "  {} ({}, {})",
            doctor.name, doctor.specialization, doctor.experience
        );
    }

    appointments.close();
    Ok(())
}

async fn run_watch(gateway: &str, collection: String, order_by: String) -> Result<()> {
    let store = GatewayStore::new(gateway).context("configure gateway store")?;
    let client = SyncClient::new(Arc::new(store));
    let subscription =
        client.subscribe::<RawRecord>(QueryDescriptor::new(collection.clone(), order_by));
    let mut views = subscription.updates();

    info!(collection = %collection, "watching collection");
    while let Some(view) = views.next().await {
        match view {
            ListView::Loading => println!("(waiting for the first snapshot)"),
            ListView::Ready(records) => {
                println!("snapshot with {} document(s)", records.len());
                for record in &records {
                    let rendered =
                        serde_json::to_string(&record.fields).context("render document")?;
                    println!("  {} {rendered}", record.id);
                }
            }
            ListView::Failed(message) => anyhow::bail!("watch failed: {message}"),
        }
    }
    Ok(())
}

async fn wait_for_list(sub: &mut LiveSubscription<Appointment>) -> Result<Vec<Appointment>> {
    while sub.changed().await {
        match sub.view() {
            ListView::Loading => continue,
            ListView::Ready(records) => return Ok(records),
            ListView::Failed(message) => anyhow::bail!("appointment feed failed: {message}"),
        }
    }
    anyhow::bail!("appointment feed closed before delivering a snapshot")
}

fn print_grouped(records: &[Appointment]) {
    let grouped = view::group_by_status(records);
    for bucket in StatusBucket::ALL {
        let entries = &grouped[&bucket];
        println!("{} ({})", bucket.as_str(), entries.len());
        for appointment in entries {
            println!(
                "  {} {}  {}  [{}]",
                appointment.appointment_date,
                appointment.appointment_time,
                appointment.doctor_name,
                appointment.notes
            );
        }
    }
}

/// Untyped record for tailing arbitrary collections: the document fields
/// stay raw JSON.
#[derive(Debug, Clone)]
struct RawRecord {
    id: DocumentId,
    fields: Map<String, Value>,
}

impl Record for RawRecord {
    fn materialize(doc: &RawDocument) -> Option<Self> {
        let id = doc.id.clone()?;
        Some(Self {
            id,
            fields: doc.fields.clone(),
        })
    }

    fn id(&self) -> &DocumentId {
        &self.id
    }
}

fn appointment_fields(
    doctor: &str,
    date: &str,
    time: &str,
    notes: &str,
    status: &str,
    timestamp: &str,
) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("doctorName".into(), Value::String(doctor.into()));
    fields.insert("appointmentDate".into(), Value::String(date.into()));
    fields.insert("appointmentTime".into(), Value::String(time.into()));
    fields.insert("notes".into(), Value::String(notes.into()));
    fields.insert("status".into(), Value::String(status.into()));
    fields.insert("timestamp".into(), Value::String(timestamp.into()));
    fields
}

fn doctor_fields(name: &str, specialization: &str, experience: &str) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("name".into(), Value::String(name.into()));
    fields.insert(
        "specialization".into(),
        Value::String(specialization.into()),
    );
    fields.insert("experience".into(), Value::String(experience.into()));
    fields
}
