mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ai_post_pipeline::archive::Archive;
use ai_post_pipeline::content::{ContentType, Placement};
use ai_post_pipeline::delivery::{MockPublishingClient, Session};
use ai_post_pipeline::error::{AuthError, GenerationError, UploadError};
use ai_post_pipeline::generation::MockImageGenerator;
use ai_post_pipeline::image_processing::NormalizedImage;
use ai_post_pipeline::notify::WebhookNotifier;
use ai_post_pipeline::pipeline::RunFailure;
use common::*;
use mockito::Matcher;

#[tokio::test]
async fn wide_image_becomes_letterboxed_square_post() {
    let uploaded: Arc<Mutex<Option<(NormalizedImage, String)>>> = Arc::new(Mutex::new(None));
    let captured = uploaded.clone();

    let mut client = MockPublishingClient::new();
    accepting_login(&mut client);
    client
        .expect_upload()
        .withf(|_, _, _, placement| *placement == Placement::Post)
        .times(1)
        .returning(move |_, image, caption, _| {
            *captured.lock().unwrap() = Some((image.clone(), caption.to_string()));
            Ok("media-42".to_string())
        });

    let mut pipeline = pipeline(
        config(),
        generator_returning(solid_png(1600, 900, [200, 20, 20])),
        client,
    );
    assert!(pipeline.run(ContentType::Posts).await);
    assert!(pipeline.last_failure().is_none());
    assert!(pipeline.has_session());

    let (image, caption) = uploaded.lock().unwrap().take().unwrap();
    assert_eq!((image.width, image.height), (1080, 1080));
    assert!(caption.contains("#AbstractArt"));
    assert!(caption.contains("#DailyArt"));

    let decoded = image::load_from_memory(&image.bytes).unwrap().to_rgb8();
    assert_eq!(decoded.dimensions(), (1080, 1080));
    // 1600x900 scales to 1080x608, centered at y=236
    let band = decoded.get_pixel(540, 540);
    assert!(band[0] > 150 && band[1] < 80, "band pixel {band:?}");
    for y in [10, 200, 880, 1070] {
        let pad = decoded.get_pixel(540, y);
        assert!(pad.0.iter().all(|&c| c > 235), "pad pixel at y={y}: {pad:?}");
    }
}

#[tokio::test]
async fn disabled_type_touches_nothing() {
    let mut generator = MockImageGenerator::new();
    generator.expect_generate().never();
    let mut client = MockPublishingClient::new();
    client.expect_authenticate().never();
    client.expect_upload().never();

    let mut pipeline = pipeline(config(), generator, client);
    assert!(!pipeline.run(ContentType::Stories).await);
    assert_eq!(pipeline.last_failure(), Some(&RunFailure::Disabled));
}

#[tokio::test]
async fn generation_error_fails_run_without_upload() {
    let mut generator = MockImageGenerator::new();
    generator
        .expect_generate()
        .times(1)
        .returning(|_, _| Err(GenerationError::Request("timed out".to_string())));
    let mut client = MockPublishingClient::new();
    client.expect_authenticate().never();
    client.expect_upload().never();

    let mut pipeline = pipeline(config(), generator, client);
    assert!(!pipeline.run(ContentType::Posts).await);
    let failure = pipeline.last_failure().unwrap();
    assert_eq!(failure.kind(), "generation_failed");
    assert!(!failure.is_fatal());
}

#[tokio::test]
async fn empty_provider_answer_is_a_failed_run() {
    let mut generator = MockImageGenerator::new();
    generator.expect_generate().returning(|_, _| Ok(None));
    let mut client = MockPublishingClient::new();
    client.expect_upload().never();

    let mut pipeline = pipeline(config(), generator, client);
    assert!(!pipeline.run(ContentType::Posts).await);
    assert_eq!(pipeline.last_failure(), Some(&RunFailure::NoImage));
}

#[tokio::test]
async fn undecodable_image_is_a_failed_run() {
    let mut client = MockPublishingClient::new();
    client.expect_upload().never();
    let mut pipeline = pipeline(config(), generator_returning(b"not an image".to_vec()), client);
    assert!(!pipeline.run(ContentType::Posts).await);
    assert_eq!(pipeline.last_failure().unwrap().kind(), "normalize_failed");
}

#[tokio::test]
async fn challenge_during_login_is_reported_distinctly() {
    let mut client = MockPublishingClient::new();
    client
        .expect_authenticate()
        .times(1)
        .returning(|_| Err(AuthError::ChallengeRequired("verify by sms".to_string())));
    client.expect_upload().never();

    let mut pipeline = pipeline(config(), generator_returning(solid_png(64, 64, [0, 0, 255])), client);
    assert!(!pipeline.run(ContentType::Posts).await);
    let failure = pipeline.last_failure().unwrap();
    assert_eq!(failure.kind(), "challenge_required");
    assert!(matches!(
        failure,
        RunFailure::Auth(AuthError::ChallengeRequired(_))
    ));
    assert!(!failure.is_fatal());
    assert!(!pipeline.has_session());
}

#[tokio::test]
async fn rejected_credentials_are_fatal() {
    let mut client = MockPublishingClient::new();
    client
        .expect_authenticate()
        .returning(|_| Err(AuthError::CredentialsInvalid("bad password".to_string())));
    let mut pipeline = pipeline(config(), generator_returning(solid_png(64, 64, [0, 0, 255])), client);
    assert!(!pipeline.run(ContentType::Posts).await);
    assert!(pipeline.last_failure().unwrap().is_fatal());
}

#[tokio::test]
async fn session_is_reused_across_runs() {
    let mut client = MockPublishingClient::new();
    client
        .expect_authenticate()
        .times(1)
        .returning(|creds| Ok(Session::new("token-1", creds.username.clone())));
    client
        .expect_upload()
        .withf(|session, _, _, _| session.token == "token-1")
        .times(2)
        .returning(|_, _, _, _| Ok("media".to_string()));

    let mut pipeline = pipeline(config(), generator_returning(solid_png(32, 32, [9, 9, 9])), client);
    assert!(pipeline.run(ContentType::Posts).await);
    assert!(pipeline.run(ContentType::Posts).await);
}

#[tokio::test]
async fn expired_session_forces_login_on_next_run() {
    let logins = Arc::new(AtomicUsize::new(0));
    let counter = logins.clone();
    let mut client = MockPublishingClient::new();
    client.expect_authenticate().times(2).returning(move |creds| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Session::new(format!("token-{n}"), creds.username.clone()))
    });
    client
        .expect_upload()
        .withf(|session, _, _, _| session.token == "token-1")
        .times(1)
        .returning(|_, _, _, _| Err(UploadError::SessionExpired("login_required".to_string())));
    client
        .expect_upload()
        .withf(|session, _, _, _| session.token == "token-2")
        .times(1)
        .returning(|_, _, _, _| Ok("media".to_string()));

    let mut pipeline = pipeline(config(), generator_returning(solid_png(32, 32, [9, 9, 9])), client);
    assert!(!pipeline.run(ContentType::Posts).await);
    assert_eq!(pipeline.last_failure().unwrap().kind(), "session_expired");
    assert!(!pipeline.has_session());
    assert!(pipeline.run(ContentType::Posts).await);
    assert_eq!(logins.load(Ordering::SeqCst), 2);
}

// ==================== batch ====================

#[tokio::test]
async fn batch_retry_is_bounded_and_never_raises() {
    let mut client = MockPublishingClient::new();
    accepting_login(&mut client);
    client
        .expect_upload()
        .times(9)
        .returning(|_, _, _, _| Err(UploadError::Transport("connection reset".to_string())));

    let mut pipeline = pipeline(config(), generator_returning(solid_png(32, 32, [1, 2, 3])), client);
    let report = pipeline.run_batch(ContentType::Posts, 3).await.unwrap();
    assert_eq!(report.outcomes.len(), 3);
    for outcome in &report.outcomes {
        assert!(!outcome.success);
        assert_eq!(outcome.attempts_used, 3);
        assert!(matches!(outcome.last_error, Some(UploadError::Transport(_))));
    }
    assert!(!report.all_delivered());
}

#[tokio::test]
async fn batch_outcomes_keep_input_order() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut client = MockPublishingClient::new();
    accepting_login(&mut client);
    client.expect_upload().returning(move |_, _, _, _| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= 3 {
            Err(UploadError::Rejected("400: caption too long".to_string()))
        } else {
            Ok(format!("media-{n}"))
        }
    });

    let mut pipeline = pipeline(config(), generator_returning(solid_png(32, 32, [1, 2, 3])), client);
    let report = pipeline.run_batch(ContentType::Posts, 3).await.unwrap();

    let summary: Vec<(bool, u32, Option<&str>)> = report
        .outcomes
        .iter()
        .map(|o| (o.success, o.attempts_used, o.post_id.as_deref()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (false, 3, None),
            (true, 1, Some("media-4")),
            (true, 1, Some("media-5")),
        ]
    );
    assert_eq!(report.delivered(), 2);
}

#[tokio::test]
async fn batch_on_disabled_type_is_rejected() {
    let mut generator = MockImageGenerator::new();
    generator.expect_generate().never();
    let mut pipeline = pipeline(config(), generator, MockPublishingClient::new());
    assert_eq!(
        pipeline.run_batch(ContentType::Stories, 2).await,
        Err(RunFailure::Disabled)
    );
}

// ==================== archive + notifications ====================

#[tokio::test]
async fn successful_run_is_archived() {
    let dir = tempfile::tempdir().unwrap();
    let archive = Archive::new(dir.path().to_path_buf());

    let mut client = MockPublishingClient::new();
    accepting_login(&mut client);
    client
        .expect_upload()
        .returning(|_, _, _, _| Ok("media-7".to_string()));

    let mut pipeline = pipeline(config(), generator_returning(solid_png(40, 20, [5, 5, 5])), client)
        .with_archive(archive.clone());
    assert!(pipeline.run(ContentType::Posts).await);

    let records = archive.recent_records(10, None).await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert!(record.success);
    assert_eq!(record.post_id.as_deref(), Some("media-7"));
    assert_eq!(record.genre, "abstract");
    assert_eq!(record.style.as_deref(), Some("surreal"));
    assert!(record.caption.contains("#AbstractArt"));
    let key = record.image_key.as_deref().unwrap();
    assert!(key.starts_with("generated/") && key.ends_with(".png"));
    assert!(archive.storage().exists(key).await.unwrap());
}

#[tokio::test]
async fn failed_run_posts_webhook_notification() {
    let mut server = mockito::Server::new_async().await;
    let hook = server
        .mock("POST", "/hook")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "content_type": "posts",
            "genre": "abstract",
            "error_kind": "generation_failed",
        })))
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    let mut generator = MockImageGenerator::new();
    generator
        .expect_generate()
        .returning(|_, _| Err(GenerationError::Rejected {
            status: 429,
            body: "rate limited".to_string(),
        }));
    let notifier = WebhookNotifier::new(&format!("{}/hook", server.url())).unwrap();
    let mut pipeline = pipeline(config(), generator, MockPublishingClient::new()).with_notifier(notifier);

    assert!(!pipeline.run(ContentType::Posts).await);
    hook.assert_async().await;
}

#[tokio::test]
async fn webhook_outage_does_not_change_the_result() {
    let mut server = mockito::Server::new_async().await;
    let hook = server
        .mock("POST", "/hook")
        .with_status(500)
        .create_async()
        .await;

    let mut generator = MockImageGenerator::new();
    generator.expect_generate().returning(|_, _| Ok(None));
    let notifier = WebhookNotifier::new(&format!("{}/hook", server.url())).unwrap();
    let mut pipeline = pipeline(config(), generator, MockPublishingClient::new()).with_notifier(notifier);

    assert!(!pipeline.run(ContentType::Posts).await);
    assert_eq!(pipeline.last_failure(), Some(&RunFailure::NoImage));
    hook.assert_async().await;
}
