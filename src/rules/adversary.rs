//! Default adversaries.
//!
//! Both lean on behavior history: where participants went before and how
//! they escaped before. Ties are broken with the contest RNG.

use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;

use crate::contest::participant::Participant;
use crate::rules::{
    Adversary, EscapeAdversary, EscapeGuess, EscapeOption, EscapeOutcome, HiddenChoice,
    ItemEffect, LocationOption, Prediction, SearchDecision,
};

/// Searches wherever most participants went this round.
#[derive(Debug, Clone, Copy, Default)]
pub struct PopularityAdversary;

/// Most frequent value in `history`, latest occurrence breaking ties.
fn favourite<T: PartialEq + Copy>(history: &[T]) -> Option<(T, usize)> {
    let mut best: Option<(T, usize)> = None;
    for value in history.iter().rev() {
        let count = history.iter().filter(|v| *v == value).count();
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((*value, count));
        }
    }
    best
}

#[allow(clippy::cast_precision_loss)]
fn share(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

impl Adversary for PopularityAdversary {
    fn decide(
        &mut self,
        options: &[LocationOption],
        choices: &[HiddenChoice<'_>],
        rng: &mut StdRng,
    ) -> SearchDecision {
        let mut counts = vec![0usize; options.len()];
        for choice in choices {
            if let Some(count) = counts.get_mut(choice.location_index) {
                *count += 1;
            }
        }

        let top = counts.iter().copied().max().unwrap_or(0);
        let (searched, reasoning) = if top == 0 {
            (
                rng.random_range(0..options.len().max(1)),
                "Nobody to track, searching at random".to_string(),
            )
        } else {
            let crowded: Vec<usize> = (0..counts.len()).filter(|i| counts[*i] == top).collect();
            let searched = crowded.choose(rng).copied().unwrap_or(0);
            let reasoning = format!(
                "{top} of {} headed for the {}",
                choices.len(),
                options.get(searched).map_or("?", |o| o.name.as_str())
            );
            (searched, reasoning)
        };

        let predictions = choices
            .iter()
            .map(|choice| {
                let history = &choice.participant.choice_history;
                let (location_index, confidence, reasoning) = match favourite(history) {
                    Some((index, count)) => (
                        index,
                        share(count, history.len()),
                        format!("went there {count} of {} rounds", history.len()),
                    ),
                    None => (searched, share(1, options.len()), "no history yet".to_string()),
                };
                Prediction {
                    participant: choice.participant.id.clone(),
                    location_index,
                    confidence,
                    reasoning,
                }
            })
            .collect();

        SearchDecision {
            searched,
            predictions,
            reasoning,
        }
    }
}

/// Predicts that caught participants repeat their favourite escape.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternEscapeAdversary;

impl EscapeAdversary for PatternEscapeAdversary {
    fn predict(
        &mut self,
        participant: &Participant,
        options: &[EscapeOption],
        rng: &mut StdRng,
    ) -> EscapeGuess {
        let offered: Vec<&str> = participant
            .escape_history
            .iter()
            .map(String::as_str)
            .filter(|id| options.iter().any(|o| o.id == *id))
            .collect();

        if let Some((option_id, count)) = favourite(&offered) {
            return EscapeGuess {
                option_id: option_id.to_string(),
                reasoning: format!("{} picked {option_id} {count} time(s) before", participant.name),
            };
        }

        EscapeGuess {
            option_id: options
                .choose(rng)
                .map(|o| o.id.clone())
                .unwrap_or_default(),
            reasoning: format!("No escape history for {}, guessing", participant.name),
        }
    }

    fn resolve(
        &self,
        chosen: &EscapeOption,
        guess: &EscapeGuess,
        stake: u32,
        participant: &Participant,
    ) -> EscapeOutcome {
        if chosen.id == guess.option_id {
            return EscapeOutcome {
                escaped: false,
                retained: 0,
            };
        }

        let bonus: f64 = participant
            .owned_items
            .iter()
            .filter_map(|item| match item.effect {
                ItemEffect::EscapeRetention(b) => Some(b),
                ItemEffect::StakeBonus(_) => None,
            })
            .sum();
        let retention = (chosen.keep_amount.unwrap_or(1.0) + bonus).clamp(0.0, 1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let retained = (f64::from(stake) * retention).floor() as u32;

        EscapeOutcome {
            escaped: true,
            retained,
        }
    }
}
