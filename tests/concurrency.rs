use std::sync::Arc;
use std::thread;

use chrono::Utc;
use facegate::config::Config;
use facegate::session::ManualClock;
use facegate::{AuthService, EnrollmentRequest, LoginRequest, Role, ServiceError, SigningKey};

const DIM: usize = 16;

fn service() -> Arc<AuthService> {
    let mut cfg = Config::default();
    cfg.embedding.grid_size = 4;
    Arc::new(AuthService::in_memory(
        &cfg,
        SigningKey::generate(),
        Arc::new(ManualClock::new(Utc::now())),
    ))
}

fn basis(i: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[i % DIM] = 1.0;
    v
}

#[test]
fn racing_enrollments_with_one_email_admit_exactly_one() {
    let service = service();
    let handles: Vec<_> = (0..32)
        .map(|i| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                let email = if i % 3 == 0 { "Dup@X.com" } else { "dup@x.com" };
                service.enroll(EnrollmentRequest {
                    name: format!("Contender {i}"),
                    email: email.into(),
                    role: "user".into(),
                    embedding: basis(i),
                })
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().all(|r| match r {
        Ok(_) => true,
        Err(ServiceError::DuplicateIdentity { .. }) => true,
        Err(_) => false,
    }));
    assert_eq!(service.store().len(), 1);
}

#[test]
fn logins_run_alongside_enrollments() {
    let service = service();
    service
        .enroll(EnrollmentRequest {
            name: "Anchor".into(),
            email: "anchor@x.com".into(),
            role: "staff".into(),
            embedding: basis(0),
        })
        .unwrap();

    thread::scope(|s| {
        for i in 1..DIM {
            let service = &service;
            s.spawn(move || {
                service
                    .enroll(EnrollmentRequest {
                        name: format!("Person {i}"),
                        email: format!("p{i}@x.com"),
                        role: "user".into(),
                        embedding: basis(i),
                    })
                    .unwrap();
            });
        }
        for _ in 0..DIM {
            let service = &service;
            s.spawn(move || {
                let token = service
                    .login(LoginRequest {
                        embedding: basis(0),
                    })
                    .unwrap()
                    .access_token;
                assert_eq!(service.me(&token).unwrap().role, Role::Staff);
            });
        }
    });

    let users = service.store().list_all();
    assert_eq!(users.len(), DIM);
    // Every visible identity is complete.
    assert!(users
        .iter()
        .all(|u| !u.name.is_empty() && u.embedding.dim() == DIM));
}
