#![allow(dead_code)]

use std::io::Cursor;

use ai_post_pipeline::config::{AppConfig, Credentials};
use ai_post_pipeline::delivery::{DeliveryAdapter, MockPublishingClient, Session};
use ai_post_pipeline::generation::MockImageGenerator;
use ai_post_pipeline::pipeline::ContentPipeline;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use rand::SeedableRng;
use rand::rngs::StdRng;

pub const BASE_CONFIG: &str = r##"
publishing:
  base_url: "https://publish.example.com"
content_generation:
  posts:
    enabled: true
    genres: [abstract]
    styles:
      abstract: [surreal]
    themes:
      abstract: [dreamscapes]
  stories:
    enabled: false
    genres: [abstract]
captions:
  hashtag_style: comprehensive
  custom_hashtags: ["#DailyArt"]
delivery:
  max_attempts: 3
  retry_delay_secs: 0
archive:
  enabled: false
"##;

pub fn config() -> AppConfig {
    AppConfig::from_yaml_str(BASE_CONFIG).unwrap()
}

pub fn credentials() -> Credentials {
    Credentials {
        username: "artbot".to_string(),
        password: "hunter2".to_string(),
    }
}

pub fn solid_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb(color));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn generator_returning(bytes: Vec<u8>) -> MockImageGenerator {
    let mut generator = MockImageGenerator::new();
    generator
        .expect_generate()
        .returning(move |_, _| Ok(Some(bytes.clone())));
    generator
}

pub fn accepting_login(client: &mut MockPublishingClient) {
    client
        .expect_authenticate()
        .returning(|creds| Ok(Session::new("token-1", creds.username.clone())));
}

pub fn pipeline(
    config: AppConfig,
    generator: MockImageGenerator,
    client: MockPublishingClient,
) -> ContentPipeline<MockPublishingClient> {
    ContentPipeline::new(
        config,
        Box::new(generator),
        DeliveryAdapter::new(client, credentials()),
        StdRng::seed_from_u64(7),
    )
}
