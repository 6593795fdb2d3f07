//! # Quorum Votes
//!
//! Gates disruptive actions (skip, stop, clear) behind a vote of the users
//! listening in the bot's voice channel.
//!
//! - One ballot per listener; voting again swaps the previous ballot
//! - Quorum is a percentage of the listeners present when a ballot arrives
//! - Exactly one outcome per vote: passed, rejected or timed out

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{GuildId, UserId};
use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{error::VoteError, session::GuildLockGuard};

/// Quién está escuchando en el canal de voz del bot
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoicePresence: Send + Sync {
    /// Usuarios (sin bots, sin contar al propio bot) en el canal del bot
    async fn listeners(&self, guild_id: GuildId) -> usize;

    async fn is_listening(&self, guild_id: GuildId, user_id: UserId) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ballot {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoteTally {
    pub yes: u32,
    pub no: u32,
}

impl VoteTally {
    fn add(&mut self, ballot: Ballot) {
        match ballot {
            Ballot::Yes => self.yes += 1,
            Ballot::No => self.no += 1,
        }
    }

    fn retract(&mut self, ballot: Ballot) {
        match ballot {
            Ballot::Yes => self.yes = self.yes.saturating_sub(1),
            Ballot::No => self.no = self.no.saturating_sub(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Passed(VoteTally),
    Rejected(VoteTally),
    TimedOut(VoteTally),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastResult {
    /// Voto contado; la votación sigue abierta
    Counted { tally: VoteTally, required: u32 },
    /// Este voto decidió la votación
    Resolved(VoteOutcome),
}

/// Reglas de una votación
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteRules {
    /// Porcentaje (0-100) de oyentes necesario para decidir
    pub ratio: u8,
    pub max_duration: Duration,
}

/// Resultado de una acción protegida por votación
#[derive(Debug, Clone, PartialEq)]
pub enum GateResult<T> {
    Passed { tally: VoteTally, value: T },
    Rejected(VoteOutcome),
}

/// Votos mínimos para alcanzar `ratio` por ciento de `listeners`
pub fn required_votes(listeners: usize, ratio: u8) -> u32 {
    let needed = (listeners as u64 * ratio as u64).div_ceil(100);
    needed.min(u32::MAX as u64) as u32
}

fn reaches_quorum(votes: u32, listeners: usize, ratio: u8) -> bool {
    votes as u64 * 100 >= ratio as u64 * listeners as u64
}

#[derive(Debug)]
enum VoteStatus {
    Open,
    Closed(VoteOutcome),
}

struct VoteState {
    guild_id: GuildId,
    ratio: u8,
    tally: VoteTally,
    voters: HashMap<UserId, Ballot>,
    status: VoteStatus,
    resolver: Option<oneshot::Sender<VoteOutcome>>,
    timeout: CancellationToken,
}

impl VoteState {
    fn register(&mut self, voter: UserId, ballot: Ballot, listeners: usize) -> Result<CastResult, VoteError> {
        if !matches!(self.status, VoteStatus::Open) {
            return Err(VoteError::Closed);
        }

        match self.voters.insert(voter, ballot) {
            Some(previous) if previous == ballot => {}
            Some(previous) => {
                self.tally.retract(previous);
                self.tally.add(ballot);
                debug!("🗳️ {} cambió su voto a {:?}", voter, ballot);
            }
            None => self.tally.add(ballot),
        }

        let outcome = if listeners == 0 {
            Some(VoteOutcome::Rejected(self.tally))
        } else if reaches_quorum(self.tally.yes, listeners, self.ratio) {
            Some(VoteOutcome::Passed(self.tally))
        } else if reaches_quorum(self.tally.no, listeners, self.ratio) {
            Some(VoteOutcome::Rejected(self.tally))
        } else {
            None
        };

        match outcome {
            Some(outcome) => {
                self.resolve(outcome);
                Ok(CastResult::Resolved(outcome))
            }
            None => Ok(CastResult::Counted {
                tally: self.tally,
                required: required_votes(listeners, self.ratio),
            }),
        }
    }

    fn time_out(&mut self) {
        if matches!(self.status, VoteStatus::Open) {
            self.resolve(VoteOutcome::TimedOut(self.tally));
        }
    }

    fn resolve(&mut self, outcome: VoteOutcome) {
        info!("🗳️ Votación en {} terminada: {:?}", self.guild_id, outcome);
        self.status = VoteStatus::Closed(outcome);
        self.voters.clear();
        self.timeout.cancel();
        if let Some(resolver) = self.resolver.take() {
            let _ = resolver.send(outcome);
        }
    }
}

/// Urna de una votación abierta; se puede clonar para cada manejador
#[derive(Clone)]
pub struct BallotBox {
    guild_id: GuildId,
    state: Arc<Mutex<VoteState>>,
    presence: Arc<dyn VoicePresence>,
}

impl BallotBox {
    /// Registra el voto de un oyente.
    ///
    /// Los usuarios que no están en el canal del bot no cuentan.
    pub async fn cast(&self, voter: UserId, ballot: Ballot) -> Result<CastResult, VoteError> {
        if self.is_closed() {
            return Err(VoteError::Closed);
        }
        if !self.presence.is_listening(self.guild_id, voter).await {
            return Err(VoteError::NotInChannel(voter));
        }
        let listeners = self.presence.listeners(self.guild_id).await;

        self.state.lock().register(voter, ballot, listeners)
    }

    pub fn tally(&self) -> VoteTally {
        self.state.lock().tally
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state.lock().status, VoteStatus::Closed(_))
    }

    pub fn outcome(&self) -> Option<VoteOutcome> {
        match self.state.lock().status {
            VoteStatus::Closed(outcome) => Some(outcome),
            VoteStatus::Open => None,
        }
    }
}

/// Abre votaciones por servidor
pub struct QuorumVoteGate {
    presence: Arc<dyn VoicePresence>,
}

impl QuorumVoteGate {
    pub fn new(presence: Arc<dyn VoicePresence>) -> Self {
        Self { presence }
    }

    /// Abre una votación; el receptor recibe exactamente un resultado
    pub fn open(&self, guild_id: GuildId, rules: VoteRules) -> (BallotBox, oneshot::Receiver<VoteOutcome>) {
        let (resolver, outcome) = oneshot::channel();
        let timeout = CancellationToken::new();

        let state = Arc::new(Mutex::new(VoteState {
            guild_id,
            ratio: rules.ratio,
            tally: VoteTally::default(),
            voters: HashMap::new(),
            status: VoteStatus::Open,
            resolver: Some(resolver),
            timeout: timeout.clone(),
        }));

        info!(
            "🗳️ Votación abierta en {} ({}%, {})",
            guild_id,
            rules.ratio,
            humantime::format_duration(rules.max_duration)
        );

        let expiring = Arc::clone(&state);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = timeout.cancelled() => {}
                _ = tokio::time::sleep(rules.max_duration) => expiring.lock().time_out(),
            }
        });

        let ballots = BallotBox {
            guild_id,
            state,
            presence: Arc::clone(&self.presence),
        };
        (ballots, outcome)
    }

    /// Abre una votación que ejecuta `on_passed` si se aprueba.
    ///
    /// `hold` se libera cuando la votación y la acción terminan.
    pub fn gate<F, Fut, T>(
        &self,
        guild_id: GuildId,
        rules: VoteRules,
        hold: Option<GuildLockGuard>,
        on_passed: F,
    ) -> (BallotBox, impl Future<Output = GateResult<T>> + Send)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send,
        T: Send,
    {
        let (ballots, outcome) = self.open(guild_id, rules);

        let decided = async move {
            let _hold = hold;
            match outcome.await {
                Ok(VoteOutcome::Passed(tally)) => GateResult::Passed {
                    tally,
                    value: on_passed().await,
                },
                Ok(other) => GateResult::Rejected(other),
                Err(_) => GateResult::Rejected(VoteOutcome::TimedOut(VoteTally::default())),
            }
        };
        (ballots, decided)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn guild() -> GuildId {
        GuildId::new(5)
    }

    fn rules(ratio: u8) -> VoteRules {
        VoteRules {
            ratio,
            max_duration: Duration::from_secs(60),
        }
    }

    fn presence(listeners: usize, members: std::ops::RangeInclusive<u64>) -> Arc<dyn VoicePresence> {
        let mut presence = MockVoicePresence::new();
        presence.expect_listeners().returning(move |_| listeners);
        presence
            .expect_is_listening()
            .returning(move |_, user| members.contains(&user.get()));
        Arc::new(presence)
    }

    #[test]
    fn required_votes_rounds_up() {
        assert_eq!(required_votes(10, 60), 6);
        assert_eq!(required_votes(3, 50), 2);
        assert_eq!(required_votes(0, 50), 0);
    }

    #[tokio::test]
    async fn sixth_yes_of_ten_passes_and_closes_the_vote() {
        let gate = QuorumVoteGate::new(presence(10, 1..=10));
        let (ballots, outcome) = gate.open(guild(), rules(60));

        for user in 1..=5 {
            let result = ballots.cast(UserId::new(user), Ballot::Yes).await.unwrap();
            assert!(matches!(result, CastResult::Counted { required: 6, .. }));
        }
        let decisive = ballots.cast(UserId::new(6), Ballot::Yes).await.unwrap();
        let expected = VoteOutcome::Passed(VoteTally { yes: 6, no: 0 });

        assert_eq!(decisive, CastResult::Resolved(expected));
        assert_eq!(outcome.await, Ok(expected));
        assert_eq!(ballots.cast(UserId::new(7), Ballot::Yes).await, Err(VoteError::Closed));
    }

    #[tokio::test]
    async fn voting_again_swaps_the_ballot() {
        let gate = QuorumVoteGate::new(presence(10, 1..=10));
        let (ballots, _outcome) = gate.open(guild(), rules(60));

        ballots.cast(UserId::new(1), Ballot::Yes).await.unwrap();
        ballots.cast(UserId::new(1), Ballot::No).await.unwrap();

        assert_eq!(ballots.tally(), VoteTally { yes: 0, no: 1 });

        ballots.cast(UserId::new(1), Ballot::No).await.unwrap();
        assert_eq!(ballots.tally(), VoteTally { yes: 0, no: 1 });
    }

    #[tokio::test]
    async fn outsiders_cannot_vote() {
        let gate = QuorumVoteGate::new(presence(2, 1..=2));
        let (ballots, _outcome) = gate.open(guild(), rules(50));

        let result = ballots.cast(UserId::new(99), Ballot::Yes).await;

        assert_eq!(result, Err(VoteError::NotInChannel(UserId::new(99))));
        assert_eq!(ballots.tally(), VoteTally::default());
    }

    #[tokio::test]
    async fn enough_no_votes_reject() {
        let gate = QuorumVoteGate::new(presence(4, 1..=4));
        let (ballots, outcome) = gate.open(guild(), rules(50));

        ballots.cast(UserId::new(1), Ballot::No).await.unwrap();
        ballots.cast(UserId::new(2), Ballot::No).await.unwrap();

        assert_eq!(outcome.await, Ok(VoteOutcome::Rejected(VoteTally { yes: 0, no: 2 })));
    }

    #[tokio::test(start_paused = true)]
    async fn unresolved_vote_times_out_once() {
        let gate = QuorumVoteGate::new(presence(10, 1..=10));
        let (ballots, outcome) = gate.open(guild(), rules(60));
        ballots.cast(UserId::new(1), Ballot::Yes).await.unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(outcome.await, Ok(VoteOutcome::TimedOut(VoteTally { yes: 1, no: 0 })));
        assert_eq!(ballots.cast(UserId::new(2), Ballot::Yes).await, Err(VoteError::Closed));
    }

    #[tokio::test]
    async fn gate_runs_the_action_only_when_passed() {
        let gate = QuorumVoteGate::new(presence(1, 1..=1));

        let (ballots, decided) = gate.gate(guild(), rules(50), None, || async { "skipped" });
        ballots.cast(UserId::new(1), Ballot::Yes).await.unwrap();

        assert_eq!(
            decided.await,
            GateResult::Passed {
                tally: VoteTally { yes: 1, no: 0 },
                value: "skipped"
            }
        );
    }
}
