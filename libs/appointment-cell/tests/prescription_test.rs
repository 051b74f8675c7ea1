// =====================================================================================
// PRESCRIPTION TESTS
// =====================================================================================

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use appointment_cell::models::{AppointmentError, CreateAppointmentRequest, UploadPrescriptionRequest};
use appointment_cell::services::{
    AppointmentBookingService, InMemoryAppointmentStore, InMemoryPrescriptionStore, PrescriptionService,
};
use shared_models::auth::Actor;
use shared_utils::clock::ManualClock;

struct Setup {
    booking: AppointmentBookingService,
    prescriptions: PrescriptionService,
    clock: Arc<ManualClock>,
    doctor: Actor,
    patient: Actor,
}

fn opening() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 3, 10, 9, 0, 0).unwrap()
}

fn setup() -> Setup {
    let store = Arc::new(InMemoryAppointmentStore::new());
    let clock = Arc::new(ManualClock::new(opening()));
    let prescription_store = Arc::new(InMemoryPrescriptionStore::new(store.clone()));

    Setup {
        booking: AppointmentBookingService::new(store.clone(), clock.clone()),
        prescriptions: PrescriptionService::new(prescription_store, store, clock.clone()),
        clock,
        doctor: Actor::doctor(Uuid::new_v4()),
        patient: Actor::patient(Uuid::new_v4()),
    }
}

fn upload(file: &str) -> UploadPrescriptionRequest {
    UploadPrescriptionRequest {
        file: file.to_string(),
        notes: "Twice daily after meals".to_string(),
    }
}

impl Setup {
    async fn book_at(&self, at: DateTime<Utc>) -> Uuid {
        self.booking
            .create_appointment(
                &self.patient,
                CreateAppointmentRequest {
                    doctor_id: self.doctor.user_id,
                    scheduled_time: at,
                    reason: None,
                },
            )
            .await
            .unwrap()
            .id
    }

    async fn completed_appointment(&self) -> Uuid {
        let id = self.book_at(opening() + Duration::hours(1)).await;
        self.booking.complete_meeting(id, &self.doctor).await.unwrap();
        id
    }
}

#[tokio::test]
async fn test_upload_requires_session_progress() {
    let s = setup();
    let at = opening() + Duration::hours(1);
    let id = s.book_at(at).await;

    assert_matches!(
        s.prescriptions.upload(id, &s.doctor, upload("rx/a.pdf")).await,
        Err(AppointmentError::Validation { field, .. }) if field == "appointment"
    );

    s.clock.set(at + Duration::minutes(2));
    s.booking.start_meeting(id, &s.doctor).await.unwrap();

    let stored = s
        .prescriptions
        .upload(id, &s.doctor, upload("rx/a.pdf"))
        .await
        .unwrap();
    assert_eq!(stored.uploaded_by, Some(s.doctor.user_id));
    assert_eq!(stored.file.as_deref(), Some("rx/a.pdf"));
    assert_eq!(stored.created_at, at + Duration::minutes(2));
}

#[tokio::test]
async fn test_upload_rejects_other_doctors_and_duplicates() {
    let s = setup();
    let id = s.completed_appointment().await;

    assert_matches!(
        s.prescriptions
            .upload(id, &Actor::doctor(Uuid::new_v4()), upload("rx/x.pdf"))
            .await,
        Err(AppointmentError::NotAuthorized)
    );
    assert_matches!(
        s.prescriptions.upload(id, &s.patient, upload("rx/x.pdf")).await,
        Err(AppointmentError::NotAuthorized)
    );
    assert_matches!(
        s.prescriptions.upload(id, &s.doctor, upload("   ")).await,
        Err(AppointmentError::Validation { field, .. }) if field == "file"
    );

    s.prescriptions.upload(id, &s.doctor, upload("rx/1.pdf")).await.unwrap();
    assert_matches!(
        s.prescriptions.upload(id, &s.doctor, upload("rx/2.pdf")).await,
        Err(AppointmentError::DuplicatePrescription)
    );
}

#[tokio::test]
async fn test_download_access() {
    let s = setup();
    let id = s.completed_appointment().await;
    let rx = s
        .prescriptions
        .upload(id, &s.doctor, upload("prescriptions/2030/rx.pdf"))
        .await
        .unwrap();

    for actor in [s.patient, s.doctor, Actor::admin(Uuid::new_v4())] {
        let file = s.prescriptions.file_for_download(rx.id, &actor).await.unwrap();
        assert_eq!(file, "prescriptions/2030/rx.pdf");
    }

    assert_matches!(
        s.prescriptions
            .file_for_download(rx.id, &Actor::patient(Uuid::new_v4()))
            .await,
        Err(AppointmentError::NotAuthorized)
    );
    assert_matches!(
        s.prescriptions.file_for_download(Uuid::new_v4(), &s.patient).await,
        Err(AppointmentError::PrescriptionNotFound)
    );
}

#[tokio::test]
async fn test_list_is_scoped_and_newest_first() {
    let s = setup();
    let first = s.completed_appointment().await;
    s.prescriptions.upload(first, &s.doctor, upload("rx/first.pdf")).await.unwrap();

    let second = s.book_at(opening() + Duration::hours(3)).await;
    s.booking.complete_meeting(second, &s.doctor).await.unwrap();
    s.clock.advance(Duration::minutes(10));
    s.prescriptions.upload(second, &s.doctor, upload("rx/second.pdf")).await.unwrap();

    let for_patient = s.prescriptions.list(&s.patient).await.unwrap();
    assert_eq!(for_patient.len(), 2);
    assert_eq!(for_patient[0].prescription.file.as_deref(), Some("rx/second.pdf"));
    assert_eq!(for_patient[0].appointment.id, second);

    assert_eq!(s.prescriptions.list(&s.doctor).await.unwrap().len(), 2);
    assert!(s
        .prescriptions
        .list(&Actor::patient(Uuid::new_v4()))
        .await
        .unwrap()
        .is_empty());
    assert!(s
        .prescriptions
        .list(&Actor::doctor(Uuid::new_v4()))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        s.prescriptions.list(&Actor::admin(Uuid::new_v4())).await.unwrap().len(),
        2
    );
}
