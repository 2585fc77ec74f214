#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;
use uuid::Uuid;

use appointment_cell::{
    AppointmentBookingService, AppointmentNotification, AppointmentNotifier, BookAppointmentRequest, LogNotifier,
};
use shared_config::AppConfig;
use shared_database::{ClinicStore, InMemoryStore};
use shared_models::{DentistSlot, Slot};
use shared_utils::test_utils::{fixed_clock, reference_monday, seed_slot, TestConfig};
use shared_utils::FixedClock;

/// Remembers every notification it receives.
#[derive(Default)]
pub struct RecordingNotifier {
    pub received: Mutex<Vec<AppointmentNotification>>,
}

#[async_trait]
impl AppointmentNotifier for RecordingNotifier {
    async fn notify(&self, notification: &AppointmentNotification) -> anyhow::Result<()> {
        self.received.lock().await.push(notification.clone());
        Ok(())
    }
}

/// Rejects every notification.
pub struct FailingNotifier;

#[async_trait]
impl AppointmentNotifier for FailingNotifier {
    async fn notify(&self, _notification: &AppointmentNotification) -> anyhow::Result<()> {
        Err(anyhow!("mail relay unreachable"))
    }
}

/// Answers only after the given delay.
pub struct SlowNotifier(pub Duration);

#[async_trait]
impl AppointmentNotifier for SlowNotifier {
    async fn notify(&self, _notification: &AppointmentNotification) -> anyhow::Result<()> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

/// A store holding open slots at DRP-MAK on the reference Monday, one per hour from 09:00,
/// each linked to the same dentist.
pub struct Harness {
    pub store: InMemoryStore,
    pub clock: Arc<FixedClock>,
    pub dentist: Uuid,
    pub slots: Vec<Slot>,
}

impl Harness {
    pub async fn new(slot_count: u32) -> Self {
        let store = InMemoryStore::new();
        let dentist = Uuid::new_v4();
        let today = reference_monday();

        let mut slots = Vec::new();
        for hour in 9..9 + slot_count {
            slots.push(seed_slot(&store, "DRP-MAK", today, hour).await);
        }

        let harness = Self {
            store,
            clock: fixed_clock(today),
            dentist,
            slots,
        };
        for slot in &harness.slots {
            harness.link(dentist, slot).await;
        }
        harness
    }

    pub async fn link(&self, dentist_id: Uuid, slot: &Slot) {
        let mut tx = self.store.begin().await.unwrap();
        tx.insert_dentist_slot(DentistSlot::for_slot(dentist_id, slot, slot.created_at))
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    pub async fn add_slot(&self, date: NaiveDate, hour: u32) -> Slot {
        let slot = seed_slot(&self.store, "DRP-MAK", date, hour).await;
        self.link(self.dentist, &slot).await;
        slot
    }

    pub fn service(&self) -> AppointmentBookingService {
        self.service_with(Arc::new(LogNotifier), &TestConfig::default().to_app_config())
    }

    pub fn service_with(&self, notifier: Arc<dyn AppointmentNotifier>, config: &AppConfig) -> AppointmentBookingService {
        AppointmentBookingService::new(Arc::new(self.store.clone()), notifier, self.clock.clone(), config)
    }

    pub fn booking(&self, slot: &Slot) -> BookAppointmentRequest {
        BookAppointmentRequest {
            slot_id: slot.id,
            patient_id: Uuid::new_v4(),
            dentist_id: self.dentist,
            notes: None,
            billing_id: None,
            booked_by: Some("front-desk".to_string()),
        }
    }

    pub async fn is_open(&self, slot: &Slot) -> bool {
        let mut tx = self.store.begin().await.unwrap();
        tx.get_slot(slot.id).await.unwrap().unwrap().is_active
    }
}
