mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use appointment_cell::{
    AppointmentError, CancelAppointmentRequest, NotificationEvent, RescheduleAppointmentRequest,
    UpdateStatusRequest,
};
use shared_config::AppConfig;
use shared_database::AppointmentFilter;
use shared_models::{AppointmentStatus, AuditAction};
use shared_utils::test_utils::{reference_monday, TestConfig};

use common::{FailingNotifier, Harness, RecordingNotifier, SlowNotifier};

fn reschedule_to(slot_id: Uuid) -> RescheduleAppointmentRequest {
    RescheduleAppointmentRequest {
        new_slot_id: slot_id,
        reason: Some("patient asked for a later hour".to_string()),
        changed_by: Some("front-desk".to_string()),
    }
}

fn cancel_because(reason: &str) -> CancelAppointmentRequest {
    CancelAppointmentRequest {
        reason: reason.to_string(),
        cancelled_by: Some("patient".to_string()),
    }
}

fn status(status: AppointmentStatus, reason: Option<&str>) -> UpdateStatusRequest {
    UpdateStatusRequest {
        status,
        reason: reason.map(str::to_string),
        changed_by: Some("dr-santos".to_string()),
    }
}

#[tokio::test]
async fn booking_holds_the_slot() {
    let harness = Harness::new(1).await;
    let service = harness.service();
    let slot = &harness.slots[0];

    let appointment = service.claim_slot(harness.booking(slot)).await.unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Scheduled);
    assert_eq!(appointment.reschedule_count, 0);
    assert_eq!(appointment.slot_id, slot.id);
    assert_eq!(appointment.branch_id, "DRP-MAK");
    assert_eq!(appointment.status_changed_by.as_deref(), Some("front-desk"));
    assert!(!harness.is_open(slot).await);

    let history = service.appointment_history(appointment.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, AuditAction::Booked);
    assert!(history[0].before.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_on_one_slot_have_a_single_winner() {
    let harness = Harness::new(1).await;
    let service = Arc::new(harness.service());
    let slot = harness.slots[0].clone();

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            let request = harness.booking(&slot);
            tokio::spawn(async move { service.claim_slot(request).await })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners = results.iter().filter(|result| result.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|result| matches!(result, Err(AppointmentError::SlotNotAvailable)))
        .count();

    assert_eq!(winners, 1);
    assert_eq!(conflicts, 7);
    assert!(!harness.is_open(&slot).await);

    let holders = service
        .list_appointments(&AppointmentFilter {
            slot_id: Some(slot.id),
            ..AppointmentFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(holders.len(), 1);
}

#[tokio::test]
async fn reschedule_moves_the_hold() {
    let harness = Harness::new(2).await;
    let service = harness.service();
    let (first, second) = (&harness.slots[0], &harness.slots[1]);

    let booked = service.claim_slot(harness.booking(first)).await.unwrap();
    let moved = service.reschedule(booked.id, reschedule_to(second.id)).await.unwrap();

    assert_eq!(moved.slot_id, second.id);
    assert_eq!(moved.reschedule_count, 1);
    assert_eq!(moved.status, AppointmentStatus::Scheduled);
    assert_eq!(moved.reason_for_status_change.as_deref(), Some("patient asked for a later hour"));
    assert!(harness.is_open(first).await);
    assert!(!harness.is_open(second).await);

    let history = service.appointment_history(booked.id).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.action, AuditAction::Rescheduled);
    assert_eq!(last.before.as_ref().unwrap()["slot_id"], serde_json::json!(first.id));
    assert_eq!(last.after["slot_id"], serde_json::json!(second.id));
}

#[tokio::test]
async fn fourth_reschedule_is_rejected_without_side_effects() {
    let harness = Harness::new(5).await;
    let service = harness.service();
    let slots = &harness.slots;

    let mut appointment = service.claim_slot(harness.booking(&slots[0])).await.unwrap();
    for slot in &slots[1..4] {
        appointment = service.reschedule(appointment.id, reschedule_to(slot.id)).await.unwrap();
    }
    assert_eq!(appointment.reschedule_count, 3);

    let result = service.reschedule(appointment.id, reschedule_to(slots[4].id)).await;

    assert_matches!(result, Err(AppointmentError::RescheduleLimitReached { limit: 3 }));
    let unchanged = service.get_appointment(appointment.id).await.unwrap();
    assert_eq!(unchanged, appointment);
    assert!(!harness.is_open(&slots[3]).await);
    assert!(harness.is_open(&slots[4]).await);
}

#[tokio::test]
async fn reschedule_cap_follows_configuration() {
    let harness = Harness::new(2).await;
    let config = TestConfig {
        max_reschedules: 0,
        ..TestConfig::default()
    }
    .to_app_config();
    let service = harness.service_with(Arc::new(appointment_cell::LogNotifier), &config);

    let booked = service.claim_slot(harness.booking(&harness.slots[0])).await.unwrap();
    let result = service.reschedule(booked.id, reschedule_to(harness.slots[1].id)).await;

    assert_matches!(result, Err(AppointmentError::RescheduleLimitReached { limit: 0 }));
}

#[tokio::test]
async fn reschedule_onto_a_held_slot_conflicts() {
    let harness = Harness::new(2).await;
    let service = harness.service();

    let first = service.claim_slot(harness.booking(&harness.slots[0])).await.unwrap();
    service.claim_slot(harness.booking(&harness.slots[1])).await.unwrap();

    let result = service.reschedule(first.id, reschedule_to(harness.slots[1].id)).await;

    assert_matches!(result, Err(AppointmentError::SlotNotAvailable));
    assert!(!harness.is_open(&harness.slots[0]).await);
    assert_eq!(service.get_appointment(first.id).await.unwrap().reschedule_count, 0);
}

#[tokio::test]
async fn reschedule_onto_the_same_slot_is_invalid() {
    let harness = Harness::new(1).await;
    let service = harness.service();

    let booked = service.claim_slot(harness.booking(&harness.slots[0])).await.unwrap();
    let result = service.reschedule(booked.id, reschedule_to(harness.slots[0].id)).await;

    assert_matches!(result, Err(AppointmentError::ValidationError(_)));
}

#[tokio::test]
async fn cancel_then_rebook_the_same_slot() {
    let harness = Harness::new(1).await;
    let service = harness.service();
    let slot = &harness.slots[0];

    let first = service.claim_slot(harness.booking(slot)).await.unwrap();
    let cancelled = service
        .cancel_appointment(first.id, cancel_because("fever"))
        .await
        .unwrap();

    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.reason_for_status_change.as_deref(), Some("fever"));
    assert_eq!(cancelled.status_changed_by.as_deref(), Some("patient"));
    assert!(harness.is_open(slot).await);

    let second = assert_ok!(service.claim_slot(harness.booking(slot)).await);
    assert_ne!(second.id, first.id);
    assert!(!harness.is_open(slot).await);
}

#[tokio::test]
async fn release_slot_cancels_for_the_workflow() {
    let harness = Harness::new(1).await;
    let service = harness.service();

    let booked = service.claim_slot(harness.booking(&harness.slots[0])).await.unwrap();
    let released = service.release_slot(booked.id, "duplicate booking").await.unwrap();

    assert_eq!(released.status, AppointmentStatus::Cancelled);
    assert!(released.status_changed_by.is_none());
    assert!(harness.is_open(&harness.slots[0]).await);
}

#[tokio::test]
async fn cancellation_needs_a_real_reason() {
    let harness = Harness::new(1).await;
    let service = harness.service();

    let booked = service.claim_slot(harness.booking(&harness.slots[0])).await.unwrap();

    for reason in ["", "  ", "no"] {
        let result = service.cancel_appointment(booked.id, cancel_because(reason)).await;
        assert_matches!(result, Err(AppointmentError::ValidationError(_)));
    }
    let result = service
        .update_status(booked.id, status(AppointmentStatus::NoShow, None))
        .await;
    assert_matches!(result, Err(AppointmentError::ValidationError(_)));

    assert_eq!(
        service.get_appointment(booked.id).await.unwrap().status,
        AppointmentStatus::Scheduled
    );
    assert!(!harness.is_open(&harness.slots[0]).await);
}

#[tokio::test]
async fn no_show_releases_but_completion_keeps_the_slot() {
    let harness = Harness::new(2).await;
    let service = harness.service();

    let missed = service.claim_slot(harness.booking(&harness.slots[0])).await.unwrap();
    let no_show = service
        .update_status(missed.id, status(AppointmentStatus::NoShow, Some("did not arrive")))
        .await
        .unwrap();
    assert_eq!(no_show.status, AppointmentStatus::NoShow);
    assert!(harness.is_open(&harness.slots[0]).await);

    let seen = service.claim_slot(harness.booking(&harness.slots[1])).await.unwrap();
    service
        .update_status(seen.id, status(AppointmentStatus::CheckedIn, None))
        .await
        .unwrap();
    let completed = service
        .update_status(seen.id, status(AppointmentStatus::Completed, None))
        .await
        .unwrap();
    assert_eq!(completed.status, AppointmentStatus::Completed);
    assert_eq!(completed.status_changed_by.as_deref(), Some("dr-santos"));
    assert!(!harness.is_open(&harness.slots[1]).await);

    let history = service.appointment_history(seen.id).await.unwrap();
    let actions: Vec<_> = history.iter().map(|entry| entry.action).collect();
    assert_eq!(
        actions,
        vec![AuditAction::Booked, AuditAction::StatusChanged, AuditAction::StatusChanged]
    );
}

#[tokio::test]
async fn terminal_appointments_cannot_move() {
    let harness = Harness::new(2).await;
    let service = harness.service();

    let booked = service.claim_slot(harness.booking(&harness.slots[0])).await.unwrap();
    service
        .cancel_appointment(booked.id, cancel_because("moved abroad"))
        .await
        .unwrap();

    let again = service.cancel_appointment(booked.id, cancel_because("moved abroad")).await;
    assert_matches!(
        again,
        Err(AppointmentError::InvalidStatusTransition {
            from: AppointmentStatus::Cancelled,
            to: AppointmentStatus::Cancelled
        })
    );

    let moved = service.reschedule(booked.id, reschedule_to(harness.slots[1].id)).await;
    assert_matches!(moved, Err(AppointmentError::InvalidStatusTransition { .. }));

    // the slot it gave back stays open
    assert!(harness.is_open(&harness.slots[0]).await);
    assert!(harness.is_open(&harness.slots[1]).await);
}

#[tokio::test]
async fn checked_in_appointments_cannot_be_rescheduled() {
    let harness = Harness::new(2).await;
    let service = harness.service();

    let booked = service.claim_slot(harness.booking(&harness.slots[0])).await.unwrap();
    service
        .update_status(booked.id, status(AppointmentStatus::CheckedIn, None))
        .await
        .unwrap();

    let result = service.reschedule(booked.id, reschedule_to(harness.slots[1].id)).await;
    assert_matches!(result, Err(AppointmentError::InvalidStatusTransition { .. }));
}

#[tokio::test]
async fn past_slots_cannot_be_booked() {
    let harness = Harness::new(0).await;
    let yesterday = reference_monday().pred_opt().unwrap();
    let slot = harness.add_slot(yesterday, 9).await;

    let result = harness.service().claim_slot(harness.booking(&slot)).await;

    assert_matches!(result, Err(AppointmentError::ValidationError(_)));
    assert!(harness.is_open(&slot).await);
}

#[tokio::test]
async fn slots_that_already_started_today_cannot_be_booked() {
    // the harness clock reads 08:00 on the reference Monday
    let harness = Harness::new(0).await;
    let started = harness.add_slot(reference_monday(), 7).await;
    let upcoming = harness.add_slot(reference_monday(), 8).await;
    let service = harness.service();

    let result = service.claim_slot(harness.booking(&started)).await;
    assert_matches!(result, Err(AppointmentError::ValidationError(msg)) if msg.contains("07:00"));
    assert!(harness.is_open(&started).await);

    assert_ok!(service.claim_slot(harness.booking(&upcoming)).await);
}

#[tokio::test]
async fn dentist_must_be_linked_to_the_slot() {
    let harness = Harness::new(1).await;
    let mut request = harness.booking(&harness.slots[0]);
    request.dentist_id = Uuid::new_v4();

    let result = harness.service().claim_slot(request).await;

    assert_matches!(result, Err(AppointmentError::DentistNotAssigned { .. }));
    assert!(harness.is_open(&harness.slots[0]).await);
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let harness = Harness::new(1).await;
    let service = harness.service();

    let mut request = harness.booking(&harness.slots[0]);
    request.slot_id = Uuid::new_v4();
    assert_matches!(service.claim_slot(request).await, Err(AppointmentError::SlotNotFound(_)));

    assert_matches!(service.get_appointment(Uuid::new_v4()).await, Err(AppointmentError::NotFound));
    assert_err!(service.release_slot(Uuid::new_v4(), "not here").await);
}

#[tokio::test]
async fn notification_failure_vetoes_cancellation() {
    let harness = Harness::new(1).await;
    let service = harness.service_with(Arc::new(FailingNotifier), &TestConfig::default().to_app_config());

    // booking does not notify, so it goes through
    let booked = service.claim_slot(harness.booking(&harness.slots[0])).await.unwrap();

    let result = service.cancel_appointment(booked.id, cancel_because("fever")).await;

    assert_matches!(result, Err(AppointmentError::NotificationFailed(msg)) if msg.contains("mail relay"));
    assert_eq!(service.get_appointment(booked.id).await.unwrap(), booked);
    assert!(!harness.is_open(&harness.slots[0]).await);
    assert_eq!(service.appointment_history(booked.id).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_notifier_times_out_without_stalling_other_bookings() {
    let harness = Harness::new(2).await;
    let config = AppConfig {
        notification_timeout_secs: 1,
        ..TestConfig::default().to_app_config()
    };
    let service = Arc::new(harness.service_with(Arc::new(SlowNotifier(Duration::from_secs(30))), &config));
    let booked = assert_ok!(service.claim_slot(harness.booking(&harness.slots[0])).await);

    let started = Instant::now();
    let cancelling = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .cancel_appointment(booked.id, cancel_because("feeling better"))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let other = assert_ok!(service.claim_slot(harness.booking(&harness.slots[1])).await);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(other.slot_id, harness.slots[1].id);

    assert_matches!(cancelling.await.unwrap(), Err(AppointmentError::NotificationFailed(_)));
    assert_eq!(
        service.get_appointment(booked.id).await.unwrap().status,
        AppointmentStatus::Scheduled
    );
    assert!(!harness.is_open(&harness.slots[0]).await);
}

#[tokio::test]
async fn notification_failure_vetoes_reschedule() {
    let harness = Harness::new(2).await;
    let service = harness.service_with(Arc::new(FailingNotifier), &TestConfig::default().to_app_config());

    let booked = service.claim_slot(harness.booking(&harness.slots[0])).await.unwrap();
    let result = service.reschedule(booked.id, reschedule_to(harness.slots[1].id)).await;

    assert_matches!(result, Err(AppointmentError::NotificationFailed(_)));
    assert!(!harness.is_open(&harness.slots[0]).await);
    assert!(harness.is_open(&harness.slots[1]).await);
    assert_eq!(service.get_appointment(booked.id).await.unwrap().reschedule_count, 0);
}

#[tokio::test]
async fn notifications_are_sent_for_cancel_reschedule_and_no_show() {
    let harness = Harness::new(4).await;
    let notifier = Arc::new(RecordingNotifier::default());
    let service = harness.service_with(notifier.clone(), &TestConfig::default().to_app_config());

    let a = service.claim_slot(harness.booking(&harness.slots[0])).await.unwrap();
    service.reschedule(a.id, reschedule_to(harness.slots[1].id)).await.unwrap();
    service.cancel_appointment(a.id, cancel_because("fever")).await.unwrap();

    let b = service.claim_slot(harness.booking(&harness.slots[2])).await.unwrap();
    service
        .update_status(b.id, status(AppointmentStatus::CheckedIn, None))
        .await
        .unwrap();
    service
        .update_status(b.id, status(AppointmentStatus::NoShow, Some("left before treatment")))
        .await
        .unwrap();

    let received = notifier.received.lock().await;
    let events: Vec<_> = received.iter().map(|n| n.event).collect();
    assert_eq!(
        events,
        vec![NotificationEvent::Rescheduled, NotificationEvent::Cancelled, NotificationEvent::NoShow]
    );
    assert_eq!(received[0].previous_slot_id, Some(harness.slots[0].id));
    assert_eq!(received[0].slot_id, harness.slots[1].id);
    assert_eq!(received[1].reason.as_deref(), Some("fever"));
}

#[tokio::test]
async fn appointments_can_be_searched() {
    let harness = Harness::new(3).await;
    let service = harness.service();

    let mut request = harness.booking(&harness.slots[0]);
    let patient = request.patient_id;
    let first = service.claim_slot(request.clone()).await.unwrap();

    request.slot_id = harness.slots[1].id;
    let second = service.claim_slot(request).await.unwrap();
    service.claim_slot(harness.booking(&harness.slots[2])).await.unwrap();

    service
        .cancel_appointment(first.id, cancel_because("double booked"))
        .await
        .unwrap();

    let mine = service
        .list_appointments(&AppointmentFilter {
            patient_id: Some(patient),
            ..AppointmentFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(mine.len(), 2);

    let still_scheduled = service
        .list_appointments(&AppointmentFilter {
            patient_id: Some(patient),
            status: Some(AppointmentStatus::Scheduled),
            ..AppointmentFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(still_scheduled.len(), 1);
    assert_eq!(still_scheduled[0].id, second.id);

    let branch = service
        .list_appointments(&AppointmentFilter {
            branch_id: Some("DRP-MAK".to_string()),
            ..AppointmentFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(branch.len(), 3);
}
