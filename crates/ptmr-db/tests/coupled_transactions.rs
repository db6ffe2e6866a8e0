use chrono::NaiveDate;
use serde_json::json;

use ptmr_core::models::{
    ApplicationStatus, PayloadCandidate, PayloadCreateApplication, PayloadDeleteApplication,
    PayloadDeletePastExperience, PayloadPastExperience, Swipe, TaskKind, TaskOptions, TaskPayload,
};
use ptmr_core::OutboxSource;
use ptmr_db::db::{
    CreateApplicationParams, CreateCandidateParams, CreatePastExperienceParams,
    DeleteApplicationParams, DeletePastExperienceParams, UpdateApplicationStatusParams,
};
use ptmr_db::{DbError, MemoryStore, Store, TxError};

fn candidate_params(user_uid: &str) -> CreateCandidateParams {
    CreateCandidateParams {
        user_uid: user_uid.to_string(),
        full_name: "Ann Lee".to_string(),
        email: "ann@example.com".to_string(),
        education: None,
        about_me: Some("Rust developer".to_string()),
    }
}

fn application_params(candidate_id: i64, job_id: i64) -> CreateApplicationParams {
    CreateApplicationParams {
        candidate_id,
        employer_id: 42,
        job_id,
        message: Some("hi".to_string()),
    }
}

fn app_doc() -> serde_json::Map<String, serde_json::Value> {
    let mut doc = serde_json::Map::new();
    doc.insert("message".to_string(), json!("hi"));
    doc
}

async fn seeded_store() -> (MemoryStore, Store<MemoryStore>, i64) {
    let memory = MemoryStore::new();
    let store = Store::new(memory.clone());
    let candidate = store
        .create_candidate_tx(candidate_params("uid-1"), |_, _| Ok(()))
        .await
        .unwrap();
    (memory, store, candidate.id)
}

#[tokio::test]
async fn test_after_effect_stages_task_with_the_write() {
    let memory = MemoryStore::new();
    let store = Store::new(memory.clone());

    let candidate = store
        .create_candidate_tx(candidate_params("uid-1"), |candidate, staged| {
            staged.push(
                &TaskPayload::CreateCandidate(PayloadCandidate {
                    candidate: candidate.clone(),
                }),
                TaskOptions::critical(),
            )?;
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(memory.candidates().await, vec![candidate.clone()]);
    let outbox = memory.outbox_entries().await;
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].kind, TaskKind::CreateCandidate);
    match TaskPayload::decode(outbox[0].kind, &outbox[0].payload).unwrap() {
        TaskPayload::CreateCandidate(p) => assert_eq!(p.candidate, candidate),
        other => panic!("unexpected payload {:?}", other),
    }
}

#[tokio::test]
async fn test_after_effect_failure_rolls_back_mutation() {
    let memory = MemoryStore::new();
    let store = Store::new(memory.clone());

    let err = store
        .create_candidate_tx(candidate_params("uid-1"), |_, _| {
            Err(anyhow::anyhow!("broker unreachable"))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, TxError::AfterEffect(_)));
    assert!(memory.candidates().await.is_empty());
    assert!(memory.outbox_entries().await.is_empty());
}

#[tokio::test]
async fn test_commit_failure_leaves_no_orphan_task() {
    let memory = MemoryStore::new();
    let store = Store::new(memory.clone());
    memory.fail_next_commit();

    let err = store
        .create_candidate_tx(candidate_params("uid-1"), |candidate, staged| {
            staged.push(
                &TaskPayload::CreateCandidate(PayloadCandidate {
                    candidate: candidate.clone(),
                }),
                TaskOptions::critical(),
            )?;
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, TxError::Commit(DbError::Unavailable(_))));
    assert!(memory.candidates().await.is_empty());
    assert!(memory.fetch_unpublished(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_mutation_failure_skips_after_effect() {
    let (memory, store, _) = seeded_store().await;
    let mut called = false;

    let err = store
        .create_candidate_tx(candidate_params("uid-1"), |_, _| {
            called = true;
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, TxError::Mutation(DbError::Conflict("candidate"))));
    assert!(!called);
    assert_eq!(memory.candidates().await.len(), 1);
}

#[tokio::test]
async fn test_candidate_application_uses_synthetic_doc_id() {
    let (memory, store, candidate_id) = seeded_store().await;

    let mut seen = None;
    let application = store
        .create_candidate_application_tx(
            application_params(candidate_id, 7),
            app_doc(),
            |doc_id, app_doc, staged| {
                seen = Some(doc_id.to_string());
                staged.push(
                    &TaskPayload::CreateCandidateApplication(PayloadCreateApplication {
                        doc_id: doc_id.to_string(),
                        app_doc,
                    }),
                    TaskOptions::critical(),
                )?;
                Ok(())
            },
        )
        .await
        .unwrap();

    let expected = format!("{}_7", candidate_id);
    assert_eq!(application.elasticsearch_doc_id, expected);
    assert_eq!(seen.as_deref(), Some(expected.as_str()));
    assert_eq!(application.status, ApplicationStatus::Pending);
    assert!(memory.candidate_application(&expected).await.is_some());
    assert_eq!(memory.outbox_entries().await.len(), 1);
}

#[tokio::test]
async fn test_delete_application_removes_row_and_stages_delete() {
    let (memory, store, candidate_id) = seeded_store().await;
    let application = store
        .create_employer_application_tx(
            application_params(candidate_id, 9),
            app_doc(),
            |_, _, _| Ok(()),
        )
        .await
        .unwrap();
    let doc_id = application.elasticsearch_doc_id.clone();

    store
        .delete_application_tx(
            DeleteApplicationParams {
                is_employer: true,
                doc_id: doc_id.clone(),
            },
            |doc_id, staged| {
                staged.push(
                    &TaskPayload::DeleteEmployerApplication(PayloadDeleteApplication {
                        doc_id: doc_id.to_string(),
                    }),
                    TaskOptions::critical(),
                )?;
                Ok(())
            },
        )
        .await
        .unwrap();

    assert!(memory.employer_application(&doc_id).await.is_none());
    let outbox = memory.outbox_entries().await;
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].kind, TaskKind::DeleteEmployerApplication);

    let err = store
        .delete_application_tx(
            DeleteApplicationParams {
                is_employer: true,
                doc_id,
            },
            |_, _| Ok(()),
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_past_experience_lifecycle() {
    let (memory, store, candidate_id) = seeded_store().await;

    let experience = store
        .create_past_experience_tx(
            CreatePastExperienceParams {
                candidate_id,
                industry: "Software".to_string(),
                job_title: "Engineer".to_string(),
                employer: "Acme".to_string(),
                start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                end_date: None,
                present: true,
                description: None,
            },
            |experience, staged| {
                staged.push(
                    &TaskPayload::AddPastExperience(PayloadPastExperience {
                        past_experience: experience.clone(),
                        user_uid: "uid-1".to_string(),
                    }),
                    TaskOptions::background(),
                )?;
                Ok(())
            },
        )
        .await
        .unwrap();
    assert_eq!(memory.past_experiences().await.len(), 1);

    let mut deleted = None;
    store
        .delete_past_experience_tx(
            DeletePastExperienceParams {
                id: experience.id,
                candidate_id,
            },
            |candidate, past_experience, staged| {
                deleted = Some((candidate, past_experience));
                staged.push(
                    &TaskPayload::DeletePastExperience(PayloadDeletePastExperience {
                        past_experience_id: past_experience.to_string(),
                        user_uid: "uid-1".to_string(),
                    }),
                    TaskOptions::background(),
                )?;
                Ok(())
            },
        )
        .await
        .unwrap();

    assert_eq!(deleted, Some((candidate_id, experience.id)));
    assert!(memory.past_experiences().await.is_empty());
    let kinds: Vec<TaskKind> = memory
        .outbox_entries()
        .await
        .iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![TaskKind::AddPastExperience, TaskKind::DeletePastExperience]
    );
}

#[tokio::test]
async fn test_status_update_records_swipe_in_same_transaction() {
    let (memory, store, candidate_id) = seeded_store().await;
    let application = store
        .create_candidate_application_tx(
            application_params(candidate_id, 7),
            app_doc(),
            |_, _, _| Ok(()),
        )
        .await
        .unwrap();

    let swipe = store
        .update_candidate_application_status_tx(
            UpdateApplicationStatusParams {
                doc_id: application.elasticsearch_doc_id.clone(),
                status: ApplicationStatus::Accepted,
            },
            |_, _| Ok(()),
        )
        .await
        .unwrap();

    assert_eq!(swipe.swipe, Swipe::Accept);
    assert_eq!(swipe.candidate_id, candidate_id);
    assert_eq!(swipe.job_id, "7");
    assert_eq!(memory.candidate_swipes().await, vec![swipe]);
}

#[tokio::test]
async fn test_status_update_with_invalid_status_rolls_back() {
    let (memory, store, candidate_id) = seeded_store().await;
    let application = store
        .create_employer_application_tx(
            application_params(candidate_id, 3),
            app_doc(),
            |_, _, _| Ok(()),
        )
        .await
        .unwrap();
    let doc_id = application.elasticsearch_doc_id.clone();

    store
        .update_employer_application_status_tx(
            UpdateApplicationStatusParams {
                doc_id: doc_id.clone(),
                status: ApplicationStatus::Rejected,
            },
            |_, _| Ok(()),
        )
        .await
        .unwrap();

    let err = store
        .update_employer_application_status_tx(
            UpdateApplicationStatusParams {
                doc_id: doc_id.clone(),
                status: ApplicationStatus::Pending,
            },
            |_, _| Ok(()),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TxError::Mutation(DbError::InvalidStatus(ApplicationStatus::Pending))
    ));
    let application = memory.employer_application(&doc_id).await.unwrap();
    assert_eq!(application.status, ApplicationStatus::Rejected);
    let swipes = memory.employer_swipes().await;
    assert_eq!(swipes.len(), 1);
    assert_eq!(swipes[0].swipe, Swipe::Reject);
}

#[tokio::test]
async fn test_outbox_source_marks_entries_published() {
    let (memory, store, _) = seeded_store().await;
    store
        .update_candidate_tx(
            ptmr_db::db::UpdateCandidateParams {
                user_uid: "uid-1".to_string(),
                full_name: "Ann B. Lee".to_string(),
                education: None,
                about_me: None,
            },
            |candidate, staged| {
                staged.push(
                    &TaskPayload::UpdateCandidate(PayloadCandidate {
                        candidate: candidate.clone(),
                    }),
                    TaskOptions::background(),
                )?;
                Ok(())
            },
        )
        .await
        .unwrap();

    let pending = memory.fetch_unpublished(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    let task_id = uuid::Uuid::new_v4();
    memory.mark_published(pending[0].id, task_id).await.unwrap();

    assert!(memory.fetch_unpublished(10).await.unwrap().is_empty());
    assert_eq!(memory.published_task_id(pending[0].id).await, Some(task_id));
    assert_eq!(memory.unpublished_count().await, 0);
}
