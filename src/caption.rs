//! Caption text and hashtag assembly.
//!
//! Pure: the only source of variety is the `Rng` handed in by the caller, so a
//! seeded generator gives reproducible captions.

use rand::Rng;
use rand::seq::IndexedRandom;

use crate::config::CaptionConfig;
use crate::error::CaptionError;

pub const AI_ART_TAGS: [&str; 5] = [
    "#AICreativity",
    "#GenerativeArt",
    "#AIArt",
    "#GenerativeAI",
    "#ArtificialIntelligence",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caption {
    pub text: String,
    pub hashtags: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct CaptionInput<'a> {
    pub genre: &'a str,
    pub style: Option<&'a str>,
    pub theme: Option<&'a str>,
}

/// `abstract` → `Abstract`, `van_gogh` → `Van_gogh`.
pub fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

pub fn genre_tag(genre: &str) -> String {
    format!("#{}Art", capitalize(genre))
}

fn template_sentences(input: &CaptionInput<'_>, use_emojis: bool) -> Vec<String> {
    let genre = input.genre;
    let bases = [
        (
            "🎨",
            format!("{} AI-generated art exploring creativity and technology", capitalize(genre)),
        ),
        (
            "✨",
            format!("Diving into the world of {genre} through AI-powered imagination"),
        ),
        (
            "🤖",
            format!("Pushing artistic boundaries with {genre} themed AI art"),
        ),
    ];

    bases
        .into_iter()
        .map(|(emoji, base)| {
            let mut sentence = if use_emojis {
                format!("{emoji} {base}")
            } else {
                base
            };
            if let Some(style) = input.style {
                sentence.push_str(&format!(" in {style} style"));
            }
            if let Some(theme) = input.theme {
                sentence.push_str(&format!(", exploring the theme of {theme}"));
            }
            sentence
        })
        .collect()
}

/// Hashtags for `style`; unknown styles produce none.
pub fn hashtags(input: &CaptionInput<'_>, config: &CaptionConfig) -> Vec<String> {
    let tags: Vec<String> = match config.hashtag_style.as_str() {
        "comprehensive" => {
            let mut tags = config.custom_hashtags.clone();
            tags.push(genre_tag(input.genre));
            tags.extend(AI_ART_TAGS.iter().map(|tag| tag.to_string()));
            if let Some(style) = input.style {
                tags.push(format!("#{}Art", style.replace(' ', "")));
            }
            if let Some(theme) = input.theme {
                let compact: String = theme
                    .chars()
                    .filter(|c| !c.is_whitespace() && *c != '\'')
                    .collect();
                tags.push(format!("#{compact}"));
            }
            tags
        }
        "minimal" => vec![genre_tag(input.genre)],
        _ => Vec::new(),
    };

    let mut unique: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        if !unique.contains(&tag) {
            unique.push(tag);
        }
    }
    unique
}

pub fn compose<R: Rng + ?Sized>(
    input: CaptionInput<'_>,
    known_genres: &[String],
    config: &CaptionConfig,
    rng: &mut R,
) -> Result<Caption, CaptionError> {
    if !known_genres.iter().any(|genre| genre == input.genre) {
        return Err(CaptionError::InvalidGenre {
            genre: input.genre.to_string(),
            available: known_genres.join(", "),
        });
    }

    let sentences = template_sentences(&input, config.use_emojis);
    let sentence = sentences
        .choose(rng)
        .cloned()
        .unwrap_or_default();
    let hashtags = hashtags(&input, config);

    let text = if hashtags.is_empty() {
        sentence
    } else {
        format!("{sentence}\n\n{}", hashtags.join(" "))
    };
    Ok(Caption { text, hashtags })
}
