//! Conversion of Gemini server content into relay turn events.

use crate::types::{ServerContent, ServerPart};
use anyhow::{Context, Result};
use base64::Engine;
use bytes::Bytes;
use pairlive_core::live::{Blob, Content, Part, TurnEvent};

/// Tracks the text of the turn in progress.
///
/// Streamed model parts are emitted as partial events. When the turn
/// completes, the accumulated text is emitted once more as a single
/// non-partial event, followed by the turn-complete marker.
#[derive(Debug, Default)]
pub struct TurnAssembler {
    text: String,
}

impl TurnAssembler {
    pub fn on_content(&mut self, content: ServerContent) -> Result<Vec<TurnEvent>> {
        let mut events = Vec::new();

        if let Some(turn) = content.model_turn {
            let parts = turn
                .parts
                .into_iter()
                .map(to_part)
                .collect::<Result<Vec<_>>>()?;
            for text in parts.iter().filter_map(|p| p.text.as_deref()) {
                self.text.push_str(text);
            }
            if !parts.is_empty() {
                events.push(TurnEvent::partial(Content::model(parts)));
            }
        }

        if content.interrupted == Some(true) {
            self.text.clear();
            events.push(TurnEvent::interrupted());
        }

        if content.turn_complete == Some(true) {
            if !self.text.is_empty() {
                let text = std::mem::take(&mut self.text);
                events.push(TurnEvent::complete(Content::model(vec![Part::from_text(
                    text,
                )])));
            }
            events.push(TurnEvent::turn_complete());
        }

        Ok(events)
    }
}

fn to_part(part: ServerPart) -> Result<Part> {
    let inline_data = part
        .inline_data
        .map(|blob| -> Result<Blob> {
            let data = base64::engine::general_purpose::STANDARD
                .decode(&blob.data)
                .context("Gemini sent inline data that is not valid base64")?;
            Ok(Blob {
                mime_type: blob.mime_type,
                data: Bytes::from(data),
            })
        })
        .transpose()?;
    Ok(Part {
        text: part.text,
        inline_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ServerBlob, ServerTurn};

    fn text_content(text: &str) -> ServerContent {
        ServerContent {
            model_turn: Some(ServerTurn {
                parts: vec![ServerPart {
                    text: Some(text.into()),
                    inline_data: None,
                }],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn text_turn_ends_with_aggregate_and_marker() {
        let mut assembler = TurnAssembler::default();
        let mut events = assembler.on_content(text_content("he")).unwrap();
        events.extend(assembler.on_content(text_content("llo")).unwrap());
        events.extend(
            assembler
                .on_content(ServerContent {
                    turn_complete: Some(true),
                    ..Default::default()
                })
                .unwrap(),
        );

        assert_eq!(
            events,
            vec![
                TurnEvent::partial(Content::model(vec![Part::from_text("he")])),
                TurnEvent::partial(Content::model(vec![Part::from_text("llo")])),
                TurnEvent::complete(Content::model(vec![Part::from_text("hello")])),
                TurnEvent::turn_complete(),
            ]
        );
    }

    #[test]
    fn interruption_discards_pending_text() {
        let mut assembler = TurnAssembler::default();
        assembler.on_content(text_content("partial answ")).unwrap();
        let events = assembler
            .on_content(ServerContent {
                interrupted: Some(true),
                turn_complete: Some(true),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(
            events,
            vec![TurnEvent::interrupted(), TurnEvent::turn_complete()]
        );
    }

    #[test]
    fn audio_parts_are_decoded() {
        let mut assembler = TurnAssembler::default();
        let events = assembler
            .on_content(ServerContent {
                model_turn: Some(ServerTurn {
                    parts: vec![ServerPart {
                        text: None,
                        inline_data: Some(ServerBlob {
                            mime_type: "audio/pcm;rate=24000".into(),
                            data: "AAEC".into(),
                        }),
                    }],
                }),
                ..Default::default()
            })
            .unwrap();

        let blob = events[0].first_part().unwrap().inline_data.clone().unwrap();
        assert_eq!(blob.data.as_ref(), &[0, 1, 2]);
        assert!(events[0].partial);
    }

    #[test]
    fn invalid_inline_data_is_an_error() {
        let mut assembler = TurnAssembler::default();
        let result = assembler.on_content(ServerContent {
            model_turn: Some(ServerTurn {
                parts: vec![ServerPart {
                    text: None,
                    inline_data: Some(ServerBlob {
                        mime_type: "audio/pcm".into(),
                        data: "%%%".into(),
                    }),
                }],
            }),
            ..Default::default()
        });
        assert!(result.is_err());
    }
}
