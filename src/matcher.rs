use facegate_vision::{match_embedding, Embedding, EmbeddingShape};

use crate::config::MatcherConfig;
use crate::error::MatchError;
use crate::identity::Identity;
use crate::storage::IdentityStore;

#[derive(Debug, Clone)]
pub struct Candidate {
    pub identity: Identity,
    pub score: f32,
}

/// The two highest-scoring identities for a query, best first.
#[derive(Debug, Clone, Default)]
pub struct Ranking {
    pub best: Option<Candidate>,
    pub runner_up: Option<Candidate>,
}

/// Anything that can rank enrolled identities against a query.
///
/// [`IdentityStore`] answers with an exact linear scan. An approximate
/// nearest-neighbour index can implement this trait without touching
/// [`Matcher`].
pub trait CandidateSource {
    fn rank(&self, query: &Embedding) -> Ranking;
}

impl CandidateSource for IdentityStore {
    fn rank(&self, query: &Embedding) -> Ranking {
        self.with_identities(|identities| {
            let (best, second) = top_two(
                identities
                    .iter()
                    .map(|identity| match_embedding(&identity.embedding, query)),
            );
            let candidate = |(position, score): (usize, f32)| Candidate {
                identity: identities[position].clone(),
                score,
            };
            Ranking {
                best: best.map(candidate),
                runner_up: second.map(candidate),
            }
        })
    }
}

/// Positions and scores of the highest and second-highest values.
/// On a tie the earlier entry is `best` and the later one `second`.
pub fn top_two(
    scores: impl IntoIterator<Item = f32>,
) -> (Option<(usize, f32)>, Option<(usize, f32)>) {
    let mut best: Option<(usize, f32)> = None;
    let mut second: Option<(usize, f32)> = None;

    for (position, score) in scores.into_iter().enumerate() {
        match best {
            Some((_, b)) if score <= b => match second {
                Some((_, s)) if score <= s => {}
                _ => second = Some((position, score)),
            },
            _ => {
                second = best;
                best = Some((position, score));
            }
        }
    }

    (best, second)
}

#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub identity: Identity,
    pub score: f32,
    /// Gap to the runner-up; `None` when only one identity is enrolled.
    pub margin: Option<f32>,
}

#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    config: MatcherConfig,
    shape: EmbeddingShape,
}

impl Matcher {
    pub fn new(config: MatcherConfig, shape: EmbeddingShape) -> Self {
        Self { config, shape }
    }

    pub fn find_match<S: CandidateSource + ?Sized>(
        &self,
        source: &S,
        query: &Embedding,
    ) -> Result<MatchOutcome, MatchError> {
        self.shape.validate(query)?;
        self.decide(source.rank(query))
    }

    /// Apply the acceptance policy to a ranking:
    /// below `accept_threshold` is no match; a gap to the runner-up smaller
    /// than `ambiguity_margin` (an exact tie included) is ambiguous.
    pub fn decide(&self, ranking: Ranking) -> Result<MatchOutcome, MatchError> {
        let Some(best) = ranking.best else {
            log::debug!("no identities enrolled");
            return Err(MatchError::NoMatch { best_score: None });
        };

        if best.score < self.config.accept_threshold {
            log::debug!(
                "best score {:.4} below threshold {:.4}",
                best.score,
                self.config.accept_threshold
            );
            return Err(MatchError::NoMatch {
                best_score: Some(best.score),
            });
        }

        let mut margin = None;
        if let Some(second) = &ranking.runner_up {
            let gap = best.score - second.score;
            if gap <= 0.0 || gap < self.config.ambiguity_margin {
                log::debug!(
                    "best score {:.4} within {:.4} of runner-up {:.4}",
                    best.score,
                    self.config.ambiguity_margin,
                    second.score
                );
                return Err(MatchError::Ambiguous {
                    best: best.score,
                    second: second.score,
                });
            }
            margin = Some(gap);
        }

        Ok(MatchOutcome {
            identity: best.identity,
            score: best.score,
            margin,
        })
    }
}
