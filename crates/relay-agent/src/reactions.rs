use crate::sequencer::CommandBatch;
use relay_core::events::{
    BitsEvent, FollowEvent, PayloadError, PointsEvent, PollEvent, SubscriptionEvent,
};
use rand::seq::IndexedRandom;
use rand::Rng;
use relay_core::hype_train::HypeTrainOutcome;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

const HYPE_START_BANNER: [&str; 3] = [
    "/me CurseLit CurseLit CurseLit CurseLit CurseLit CurseLit",
    "/me ~ The HYPE TRAIN has arrived ~",
    "/me CurseLit CurseLit CurseLit CurseLit CurseLit CurseLit",
];
const HYPE_COMPLETED: &str =
    "/me PogChamp PogChamp Level 5 Hype train COMPLETED!!! PogChamp PogChamp";
const HYPE_THANKS: &str = "/me <3 Thank you for your support <3";

/// Side effects produced for one inbound event, run in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reaction {
    pub label: String,
    /// Waited before anything else happens.
    pub pacing: Duration,
    pub chat: Vec<String>,
    pub batch: Option<CommandBatch>,
    /// Waited after the batch finishes.
    pub settle: Duration,
}

impl Reaction {
    fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }
}

/// Per-stage hype-train delays, in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PacingPolicy {
    pub start_ms: u64,
    pub progression_ms: u64,
    pub level_up_ms: u64,
    pub end_ms: u64,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            start_ms: 800,
            progression_ms: 200,
            level_up_ms: 800,
            end_ms: 800,
        }
    }
}

impl PacingPolicy {
    pub fn for_outcome(&self, outcome: &HypeTrainOutcome) -> Duration {
        let ms = match outcome {
            HypeTrainOutcome::Started(_) => self.start_ms,
            HypeTrainOutcome::Progressed(_) => self.progression_ms,
            HypeTrainOutcome::LeveledUp { .. } => self.level_up_ms,
            HypeTrainOutcome::Ended { .. } => self.end_ms,
            HypeTrainOutcome::Ignored(_) => 0,
        };
        Duration::from_millis(ms)
    }
}

/// One configured reaction. Which fields matter depends on the table the rule
/// sits in: rewards match on `prefix`, cheers on `min_bits`, subscriptions on
/// `contexts`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReactionRule {
    pub name: String,
    pub prefix: String,
    pub min_bits: u64,
    /// Empty matches every context.
    pub contexts: Vec<String>,
    /// Game mode that must be active for the rule to fire.
    pub requires_mode: Option<String>,
    pub commands: Vec<Vec<String>>,
    pub delay_ms: Option<u64>,
    pub chat: Vec<String>,
    /// Bits per unit of `{count}`; a 250-bit cheer with 100 here renders 2.
    pub per_bits: Option<u64>,
    /// Command group appended once per repetition after `commands`.
    pub spawn: Option<SpawnRule>,
}

/// A command group repeated `bits / per_bits + 1` times, each repetition
/// drawing its own `{mob}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SpawnRule {
    /// 0 runs the group once regardless of bits.
    pub per_bits: u64,
    pub max_repeats: Option<u64>,
    /// Pick list for `{mob}`. Listing an entry twice doubles its odds.
    pub mobs: Vec<String>,
    pub commands: Vec<String>,
}

impl SpawnRule {
    fn repetitions(&self, bits: Option<u64>) -> u64 {
        let repeats = match bits {
            Some(bits) if self.per_bits > 0 => bits / self.per_bits + 1,
            _ => 1,
        };
        match self.max_repeats {
            Some(cap) => repeats.min(cap),
            None => repeats,
        }
    }
}

impl ReactionRule {
    fn mode_allowed(&self, modes: &[String]) -> bool {
        match &self.requires_mode {
            Some(mode) => modes.iter().any(|active| active == mode),
            None => true,
        }
    }

    fn label(&self, fallback: &str) -> String {
        if self.name.trim().is_empty() {
            fallback.to_string()
        } else {
            self.name.clone()
        }
    }

    fn render<R: Rng + ?Sized>(
        &self,
        label: String,
        vars: &TemplateVars<'_>,
        rng: &mut R,
    ) -> Reaction {
        let count = match (self.per_bits, vars.bits) {
            (Some(unit), Some(bits)) if unit > 0 => Some(bits / unit),
            _ => None,
        };
        let vars = TemplateVars { count, ..*vars };
        let mut groups: Vec<Vec<String>> = self
            .commands
            .iter()
            .map(|group| group.iter().map(|cmd| vars.render(cmd)).collect())
            .collect();
        if let Some(spawn) = &self.spawn {
            for _ in 0..spawn.repetitions(vars.bits) {
                let mob = spawn.mobs.choose(&mut *rng).map(String::as_str);
                let vars = TemplateVars { mob, ..vars };
                groups.push(spawn.commands.iter().map(|cmd| vars.render(cmd)).collect());
            }
        }
        let mut batch = CommandBatch::new(groups);
        if let Some(ms) = self.delay_ms {
            batch = batch.with_delay(Duration::from_millis(ms));
        }
        Reaction {
            label,
            chat: self.chat.iter().map(|line| vars.render(line)).collect(),
            batch: (!batch.is_empty()).then_some(batch),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReactionTable {
    pub rewards: Vec<ReactionRule>,
    pub cheers: Vec<ReactionRule>,
    pub subscriptions: Vec<ReactionRule>,
    pub gift_settle_ms: u64,
    pub sub_settle_ms: u64,
}

impl Default for ReactionTable {
    fn default() -> Self {
        Self {
            rewards: Vec::new(),
            cheers: Vec::new(),
            subscriptions: Vec::new(),
            gift_settle_ms: 300,
            sub_settle_ms: 100,
        }
    }
}

impl ReactionTable {
    /// First reward rule whose prefix starts the title.
    pub fn reward_for(&self, title: &str, modes: &[String]) -> Option<&ReactionRule> {
        self.rewards.iter().find(|rule| {
            !rule.prefix.is_empty() && title.starts_with(&rule.prefix) && rule.mode_allowed(modes)
        })
    }

    pub fn cheer_for(&self, bits: u64, modes: &[String]) -> Option<&ReactionRule> {
        self.cheers
            .iter()
            .find(|rule| bits >= rule.min_bits && rule.mode_allowed(modes))
    }

    pub fn subscription_for(&self, context: &str, modes: &[String]) -> Option<&ReactionRule> {
        self.subscriptions.iter().find(|rule| {
            (rule.contexts.is_empty() || rule.contexts.iter().any(|c| c == context))
                && rule.mode_allowed(modes)
        })
    }
}

/// Values substituted into `{user}`, `{player}`, `{bits}`, `{count}`,
/// `{input}`, `{recipient}` and `{mob}`. Missing values render empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateVars<'a> {
    pub user: &'a str,
    pub player: &'a str,
    pub bits: Option<u64>,
    pub count: Option<u64>,
    pub input: Option<&'a str>,
    pub recipient: Option<&'a str>,
    pub mob: Option<&'a str>,
}

impl TemplateVars<'_> {
    pub fn render(&self, template: &str) -> String {
        let number = |value: Option<u64>| value.map(|n| n.to_string()).unwrap_or_default();
        template
            .replace("{user}", self.user)
            .replace("{player}", self.player)
            .replace("{bits}", &number(self.bits))
            .replace("{count}", &number(self.count))
            .replace("{input}", self.input.unwrap_or_default())
            .replace("{recipient}", self.recipient.unwrap_or_default())
            .replace("{mob}", self.mob.unwrap_or_default())
    }
}

/// Turns decoded events into reactions.
#[derive(Debug, Clone)]
pub struct Reactor {
    table: ReactionTable,
    pacing: PacingPolicy,
    player: String,
    modes: Vec<String>,
}

impl Reactor {
    pub fn new(
        table: ReactionTable,
        pacing: PacingPolicy,
        player: impl Into<String>,
        modes: Vec<String>,
    ) -> Self {
        Self {
            table,
            pacing,
            player: player.into(),
            modes,
        }
    }

    pub fn on_cheer(&self, event: &BitsEvent) -> Option<Reaction> {
        let data = &event.data;
        if !data.is_cheer() {
            return None;
        }
        let user = data.display_name();
        info!(
            event = "cheer",
            user,
            bits = data.bits_used,
            message = %data.chat_message
        );
        let rule = self.table.cheer_for(data.bits_used, &self.modes)?;
        let vars = TemplateVars {
            user,
            player: &self.player,
            bits: Some(data.bits_used),
            ..Default::default()
        };
        Some(rule.render(rule.label("cheer"), &vars, &mut rand::rng()))
    }

    pub fn on_subscription(
        &self,
        event: &SubscriptionEvent,
    ) -> Result<Option<Reaction>, PayloadError> {
        let parties = event.parties()?;
        info!(
            event = "subscription",
            context = %event.context,
            user = %parties.credited,
            recipient = parties.recipient.as_deref().unwrap_or(""),
            months = event.months.unwrap_or(0),
            plan = %event.sub_plan
        );
        let Some(rule) = self.table.subscription_for(&event.context, &self.modes) else {
            return Ok(None);
        };
        let vars = TemplateVars {
            user: &parties.credited,
            player: &self.player,
            recipient: parties.recipient.as_deref(),
            ..Default::default()
        };
        let mut reaction = rule.render(rule.label("subscription"), &vars, &mut rand::rng());
        let settle_ms = if event.is_gift() {
            self.table.gift_settle_ms
        } else {
            self.table.sub_settle_ms
        };
        reaction.settle = Duration::from_millis(settle_ms);
        Ok(Some(reaction))
    }

    pub fn on_redemption(&self, event: &PointsEvent) -> Option<Reaction> {
        let redemption = &event.data.redemption;
        let title = redemption.reward.title.as_str();
        let user = redemption.user.display_name.as_str();
        let Some(rule) = self.table.reward_for(title, &self.modes) else {
            warn!(
                event = "reward_unknown",
                reward = title,
                user,
                request = %serde_json::to_string(redemption).unwrap_or_default()
            );
            return None;
        };
        info!(event = "reward", reward = title, user);
        let vars = TemplateVars {
            user,
            player: &self.player,
            input: redemption.input(),
            ..Default::default()
        };
        Some(rule.render(rule.label(title), &vars, &mut rand::rng()))
    }

    pub fn on_follow(&self, event: &FollowEvent) {
        info!(event = "follow", user = %event.username, user_id = %event.user_id);
    }

    pub fn on_poll(&self, event: &PollEvent) -> Result<Option<Reaction>, PayloadError> {
        if !event.is_complete() {
            info!(event = "poll_update", kind = %event.kind);
            return Ok(None);
        }
        let poll = event.poll()?;
        for choice in &poll.choices {
            info!(
                event = "poll_choice",
                title = %poll.title,
                choice = %choice.title,
                votes = choice.votes.total
            );
        }
        let results = poll.results();
        let mut reaction = Reaction::new("poll_complete");
        reaction.chat.push(format!("/me Poll ended: \"{}\"", poll.title));
        if results.is_tie() {
            reaction.chat.push("/me NotLikeThis Results are tied!".to_string());
        } else {
            reaction.chat.push("/me FBtouchdown The winner was:".to_string());
        }
        for winner in &results.winners {
            reaction.chat.push(format!(
                "/me PorscheWIN {winner} ({} votes)",
                results.max_votes
            ));
        }
        Ok(Some(reaction))
    }

    pub fn on_hype_train(&self, outcome: &HypeTrainOutcome) -> Option<Reaction> {
        let mut reaction = match outcome {
            HypeTrainOutcome::Started(meter) => {
                info!(event = "hype_train_start", level = meter.level, goal = meter.goal);
                let mut reaction = Reaction::new("hype_train_start");
                reaction.chat = HYPE_START_BANNER.iter().map(|line| line.to_string()).collect();
                reaction
            }
            HypeTrainOutcome::Progressed(meter) => {
                info!(
                    event = "hype_train_progress",
                    level = meter.level,
                    value = meter.value,
                    goal = meter.goal,
                    percent = meter.percent
                );
                Reaction::new("hype_train_progress")
            }
            HypeTrainOutcome::LeveledUp {
                completed_level,
                meter,
            } => {
                info!(event = "hype_train_level_up", level = meter.level, goal = meter.goal);
                let mut reaction = Reaction::new("hype_train_level_up");
                reaction.chat = vec![
                    format!("/me Hype Train level {completed_level} completed! PogChamp"),
                    format!("/me PowerUpL Now on level {} PowerUpR", meter.level),
                ];
                reaction
            }
            HypeTrainOutcome::Ended {
                reason,
                completed,
                last,
            } => {
                info!(
                    event = "hype_train_end",
                    reason = %reason,
                    completed,
                    level = last.level,
                    percent = last.percent
                );
                let mut reaction = Reaction::new("hype_train_end");
                if *completed {
                    reaction.chat.push(HYPE_COMPLETED.to_string());
                } else {
                    reaction.chat.push(format!(
                        "/me CurseLit Hype train has ended on level {} CurseLit",
                        last.level
                    ));
                }
                reaction.chat.push(HYPE_THANKS.to_string());
                reaction
            }
            HypeTrainOutcome::Ignored(kind) => {
                info!(event = "hype_train_other", kind = %kind);
                return None;
            }
        };
        reaction.pacing = self.pacing.for_outcome(outcome);
        Some(reaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::events::decode_payload;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use relay_core::hype_train::ProgressMeter;

    fn rule(name: &str) -> ReactionRule {
        ReactionRule {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn reactor(table: ReactionTable, modes: &[&str]) -> Reactor {
        Reactor::new(
            table,
            PacingPolicy::default(),
            "Steve",
            modes.iter().map(|m| m.to_string()).collect(),
        )
    }

    #[test]
    fn template_fills_every_placeholder() {
        let vars = TemplateVars {
            user: "Viewer",
            player: "Steve",
            bits: Some(150),
            input: Some("diamond"),
            recipient: Some("Lucky"),
            ..Default::default()
        };
        assert_eq!(
            vars.render("give {player} {input} {bits} from {user} to {recipient}"),
            "give Steve diamond 150 from Viewer to Lucky"
        );
        assert_eq!(TemplateVars::default().render("x{bits}{input}y"), "xy");
    }

    #[test]
    fn reward_prefix_first_match_wins() {
        let table = ReactionTable {
            rewards: vec![
                ReactionRule {
                    prefix: "Sticky".to_string(),
                    commands: vec![vec!["effect give {player} slowness".to_string()]],
                    ..rule("sticky")
                },
                ReactionRule {
                    prefix: "Sticky Feet".to_string(),
                    commands: vec![vec!["never".to_string()]],
                    ..rule("shadowed")
                },
            ],
            ..Default::default()
        };
        let reactor = reactor(table, &[]);
        let event: PointsEvent = decode_payload(
            r#"{"type":"reward-redeemed","data":{"redemption":{"user":{"display_name":"Viewer"},"reward":{"title":"Sticky Feet"}}}}"#,
        )
        .expect("decode");
        let reaction = reactor.on_redemption(&event).expect("reaction");
        assert_eq!(reaction.label, "sticky");
        assert_eq!(
            reaction.batch.expect("batch").flatten(),
            vec!["effect give Steve slowness"]
        );
    }

    #[test]
    fn unknown_reward_yields_nothing() {
        let reactor = reactor(ReactionTable::default(), &[]);
        let event: PointsEvent = decode_payload(
            r#"{"type":"reward-redeemed","data":{"redemption":{"user":{"display_name":"Viewer"},"reward":{"title":"Mystery"}}}}"#,
        )
        .expect("decode");
        assert_eq!(reactor.on_redemption(&event), None);
    }

    #[test]
    fn cheer_rules_respect_threshold_and_mode() {
        let table = ReactionTable {
            cheers: vec![
                ReactionRule {
                    min_bits: 100,
                    requires_mode: Some("chancecubes".to_string()),
                    commands: vec![vec!["give {player} cube {bits}".to_string()]],
                    ..rule("cubes")
                },
                ReactionRule {
                    min_bits: 50,
                    commands: vec![vec!["summon pig".to_string()]],
                    delay_ms: Some(10),
                    ..rule("mobs")
                },
            ],
            ..Default::default()
        };
        let cheer: BitsEvent =
            decode_payload(r#"{"data":{"bits_used":200,"user_name":"Viewer","context":"cheer"}}"#)
                .expect("decode");

        let without_mode = reactor(table.clone(), &["mobs"]);
        let reaction = without_mode.on_cheer(&cheer).expect("reaction");
        assert_eq!(reaction.label, "mobs");
        assert_eq!(
            reaction.batch.expect("batch").delay,
            Some(Duration::from_millis(10))
        );

        let with_mode = reactor(table.clone(), &["chancecubes"]);
        let reaction = with_mode.on_cheer(&cheer).expect("reaction");
        assert_eq!(
            reaction.batch.expect("batch").flatten(),
            vec!["give Steve cube 200"]
        );

        let small: BitsEvent =
            decode_payload(r#"{"data":{"bits_used":10,"context":"cheer"}}"#).expect("decode");
        assert_eq!(with_mode.on_cheer(&small), None);
    }

    #[test]
    fn count_and_spawns_scale_with_bits() {
        let rule = ReactionRule {
            per_bits: Some(100),
            commands: vec![vec!["give {player} chancecubes:chance_cube {count}".to_string()]],
            spawn: Some(SpawnRule {
                per_bits: 85,
                mobs: vec!["minecraft:pig".to_string(), "minecraft:zombie".to_string()],
                commands: vec!["summon {mob} ~ ~1 ~ {CustomName:'\"{user}\"'}".to_string()],
                ..Default::default()
            }),
            ..rule("bits")
        };
        let vars = TemplateVars {
            user: "Viewer",
            player: "Steve",
            bits: Some(250),
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        let batch = rule.render("bits".to_string(), &vars, &mut rng).batch.expect("batch");

        assert_eq!(batch.groups.len(), 4);
        assert_eq!(batch.groups[0], vec!["give Steve chancecubes:chance_cube 2"]);
        for group in &batch.groups[1..] {
            let summon = &group[0];
            assert!(
                summon.starts_with("summon minecraft:pig ")
                    || summon.starts_with("summon minecraft:zombie "),
                "{summon}"
            );
            assert!(summon.ends_with("{CustomName:'\"Viewer\"'}"));
        }

        let capped = ReactionRule {
            spawn: Some(SpawnRule {
                max_repeats: Some(2),
                ..rule.spawn.clone().expect("spawn")
            }),
            ..rule.clone()
        };
        let batch = capped.render("bits".to_string(), &vars, &mut rng).batch.expect("batch");
        assert_eq!(batch.groups.len(), 3);
    }

    #[test]
    fn gift_spawns_one_mob_for_recipient() {
        let table = ReactionTable {
            subscriptions: vec![ReactionRule {
                contexts: vec!["subgift".to_string()],
                spawn: Some(SpawnRule {
                    per_bits: 85,
                    mobs: vec!["minecraft:cat".to_string()],
                    commands: vec![
                        "summon {mob} ~ ~1 ~ {CustomName:'\"{recipient}\"'}".to_string()
                    ],
                    ..Default::default()
                }),
                ..rule("gift")
            }],
            ..Default::default()
        };
        let reactor = reactor(table, &[]);
        let gift: SubscriptionEvent = decode_payload(
            r#"{"display_name":"Gifter","recipient_display_name":"Lucky","context":"subgift"}"#,
        )
        .expect("decode");
        let reaction = reactor
            .on_subscription(&gift)
            .expect("parties")
            .expect("reaction");
        assert_eq!(
            reaction.batch.expect("batch").flatten(),
            vec!["summon minecraft:cat ~ ~1 ~ {CustomName:'\"Lucky\"'}"]
        );
    }

    #[test]
    fn gift_subscription_settles_longer() {
        let table = ReactionTable {
            subscriptions: vec![ReactionRule {
                commands: vec![vec!["say {user} -> {recipient}".to_string()]],
                ..rule("sub")
            }],
            ..Default::default()
        };
        let reactor = reactor(table, &[]);
        let gift: SubscriptionEvent = decode_payload(
            r#"{"display_name":"Gifter","recipient_display_name":"Lucky","context":"subgift","sub_plan":"1000"}"#,
        )
        .expect("decode");
        let reaction = reactor
            .on_subscription(&gift)
            .expect("parties")
            .expect("reaction");
        assert_eq!(reaction.settle, Duration::from_millis(300));
        assert_eq!(
            reaction.batch.expect("batch").flatten(),
            vec!["say Gifter -> Lucky"]
        );

        let resub: SubscriptionEvent =
            decode_payload(r#"{"display_name":"Fan","context":"resub"}"#).expect("decode");
        let reaction = reactor
            .on_subscription(&resub)
            .expect("parties")
            .expect("reaction");
        assert_eq!(reaction.settle, Duration::from_millis(100));
    }

    #[test]
    fn poll_tie_lists_every_winner() {
        let reactor = reactor(ReactionTable::default(), &[]);
        let poll: PollEvent = decode_payload(
            r#"{"type":"POLL_COMPLETE","data":{"poll":{"title":"Next?","choices":[{"title":"Nether","votes":{"total":3}},{"title":"End","votes":{"total":3}}]}}}"#,
        )
        .expect("decode");
        let reaction = reactor.on_poll(&poll).expect("poll").expect("reaction");
        assert_eq!(
            reaction.chat,
            vec![
                "/me Poll ended: \"Next?\"",
                "/me NotLikeThis Results are tied!",
                "/me PorscheWIN Nether (3 votes)",
                "/me PorscheWIN End (3 votes)",
            ]
        );
    }

    #[test]
    fn hype_train_reactions_carry_pacing() {
        let reactor = reactor(ReactionTable::default(), &[]);
        let meter = ProgressMeter {
            level: 3,
            ..Default::default()
        };
        let level_up = reactor
            .on_hype_train(&HypeTrainOutcome::LeveledUp {
                completed_level: 2,
                meter,
            })
            .expect("reaction");
        assert_eq!(level_up.pacing, Duration::from_millis(800));
        assert_eq!(
            level_up.chat,
            vec![
                "/me Hype Train level 2 completed! PogChamp",
                "/me PowerUpL Now on level 3 PowerUpR",
            ]
        );

        let progress = reactor
            .on_hype_train(&HypeTrainOutcome::Progressed(meter))
            .expect("reaction");
        assert_eq!(progress.pacing, Duration::from_millis(200));
        assert!(progress.chat.is_empty());

        assert_eq!(
            reactor.on_hype_train(&HypeTrainOutcome::Ignored("x".to_string())),
            None
        );
    }
}
