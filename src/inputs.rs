use std::fmt;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::circuit::CircuitKind;
use crate::error::InputError;

pub const SHUFFLE_CARDS: usize = 15;
pub const COMMUNITY_CARDS: usize = 5;
pub const REVEAL_CARDS: usize = 10;
pub const REVEAL_COMMITMENTS: usize = 10;
pub const REVEAL_PLAYERS: usize = 5;

/// A BN254 field element in decimal text form.
///
/// Values can exceed `u64`, so they are carried as strings end to end.
/// Strings are passed through untouched; numbers render in base 10.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawFieldValue", into = "String")]
pub struct FieldValue(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFieldValue {
    Number(u64),
    Text(String),
}

impl From<RawFieldValue> for FieldValue {
    fn from(raw: RawFieldValue) -> Self {
        match raw {
            RawFieldValue::Number(n) => n.into(),
            RawFieldValue::Text(s) => s.into(),
        }
    }
}

impl From<FieldValue> for String {
    fn from(value: FieldValue) -> Self {
        value.0
    }
}

impl FieldValue {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue(s)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue(s.to_string())
    }
}

impl From<&BigUint> for FieldValue {
    fn from(n: &BigUint) -> Self {
        FieldValue(n.to_str_radix(10))
    }
}

impl From<BigUint> for FieldValue {
    fn from(n: BigUint) -> Self {
        FieldValue::from(&n)
    }
}

macro_rules! field_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for FieldValue {
            fn from(n: $t) -> Self {
                FieldValue(n.to_string())
            }
        })*
    };
}

field_from_int!(u8, u16, u32, u64, u128, usize);

/// One value in a `Prover.toml` document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputValue {
    Field(FieldValue),
    Bool(bool),
    Array(Vec<InputValue>),
}

impl InputValue {
    fn render(&self, out: &mut String) {
        match self {
            InputValue::Field(value) => {
                out.push('"');
                for c in value.as_str().chars() {
                    if c == '"' || c == '\\' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push('"');
            }
            InputValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            InputValue::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.render(out);
                }
                out.push(']');
            }
        }
    }
}

macro_rules! input_from_field {
    ($($t:ty),*) => {
        $(impl From<$t> for InputValue {
            fn from(value: $t) -> Self {
                InputValue::Field(value.into())
            }
        })*
    };
}

input_from_field!(FieldValue, String, &str, BigUint, u8, u16, u32, u64, u128, usize);

impl From<bool> for InputValue {
    fn from(b: bool) -> Self {
        InputValue::Bool(b)
    }
}

impl InputValue {
    pub fn bool(b: bool) -> Self {
        InputValue::Bool(b)
    }

    pub fn fields<T: Into<FieldValue>>(items: impl IntoIterator<Item = T>) -> Self {
        InputValue::Array(items.into_iter().map(|v| InputValue::Field(v.into())).collect())
    }

    pub fn bools(items: impl IntoIterator<Item = bool>) -> Self {
        InputValue::Array(items.into_iter().map(InputValue::Bool).collect())
    }
}

/// Flat, ordered circuit input document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProverInputs {
    entries: Vec<(String, InputValue)>,
}

impl ProverInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `key`, or replace its value in place if already present.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<InputValue>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<InputValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&InputValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as the `Prover.toml` text `nargo execute` reads.
    ///
    /// One `key = value` line per entry in insertion order; field elements
    /// are always quoted, booleans are bare, arrays are `[a, b]`.
    pub fn to_toml(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push_str(" = ");
            value.render(&mut out);
            out.push('\n');
        }
        out
    }
}

fn check_arity<T>(field: &'static str, items: &[T], expected: usize) -> Result<(), InputError> {
    if items.len() != expected {
        return Err(InputError::InvalidInputArity {
            field,
            expected,
            actual: items.len(),
        });
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShuffleInputs {
    pub seed: FieldValue,
    pub root_commitment: FieldValue,
    /// Shuffled deck slice, 15 cards.
    pub cards: Vec<FieldValue>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityInputs {
    /// Flop, turn and river.
    pub cards: Vec<FieldValue>,
    pub commitment: FieldValue,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealInputs {
    /// Two hole cards per seat.
    pub cards: Vec<FieldValue>,
    pub commitments: Vec<FieldValue>,
    pub players: Vec<FieldValue>,
    /// Whether each seat is still in the hand.
    pub player_status: Vec<bool>,
}

pub fn serialize_shuffle(inputs: &ShuffleInputs) -> Result<ProverInputs, InputError> {
    check_arity("cards", &inputs.cards, SHUFFLE_CARDS)?;
    Ok(ProverInputs::new()
        .with("seed", inputs.seed.clone())
        .with("root_commitment", inputs.root_commitment.clone())
        .with("cards", InputValue::fields(inputs.cards.iter().cloned())))
}

pub fn serialize_community(inputs: &CommunityInputs) -> Result<ProverInputs, InputError> {
    check_arity("cards", &inputs.cards, COMMUNITY_CARDS)?;
    Ok(ProverInputs::new()
        .with("cards", InputValue::fields(inputs.cards.iter().cloned()))
        .with("commitment", inputs.commitment.clone()))
}

pub fn serialize_reveal(inputs: &RevealInputs) -> Result<ProverInputs, InputError> {
    check_arity("cards", &inputs.cards, REVEAL_CARDS)?;
    check_arity("commitments", &inputs.commitments, REVEAL_COMMITMENTS)?;
    check_arity("players", &inputs.players, REVEAL_PLAYERS)?;
    check_arity("player_status", &inputs.player_status, REVEAL_PLAYERS)?;
    Ok(ProverInputs::new()
        .with("cards", InputValue::fields(inputs.cards.iter().cloned()))
        .with("commitments", InputValue::fields(inputs.commitments.iter().cloned()))
        .with("players", InputValue::fields(inputs.players.iter().cloned()))
        .with("player_status", InputValue::bools(inputs.player_status.iter().copied())))
}

/// Typed inputs for any circuit, as accepted over the wire.
///
/// ```json
/// {"circuit": "community", "inputs": {"cards": ["1", 2, 3, 4, 5], "commitment": "9"}}
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "circuit", content = "inputs", rename_all = "lowercase")]
pub enum CircuitInputs {
    Shuffle(ShuffleInputs),
    Community(CommunityInputs),
    Reveal(RevealInputs),
}

impl CircuitInputs {
    pub fn kind(&self) -> CircuitKind {
        match self {
            CircuitInputs::Shuffle(_) => CircuitKind::Shuffle,
            CircuitInputs::Community(_) => CircuitKind::Community,
            CircuitInputs::Reveal(_) => CircuitKind::Reveal,
        }
    }

    pub fn to_prover_inputs(&self) -> Result<ProverInputs, InputError> {
        match self {
            CircuitInputs::Shuffle(inputs) => serialize_shuffle(inputs),
            CircuitInputs::Community(inputs) => serialize_community(inputs),
            CircuitInputs::Reveal(inputs) => serialize_reveal(inputs),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn cards(n: usize, offset: u64) -> Vec<FieldValue> {
        (0..n as u64).map(|i| FieldValue::from(i + offset)).collect()
    }

    pub(crate) fn shuffle_inputs(seed: u64) -> ShuffleInputs {
        ShuffleInputs {
            seed: seed.into(),
            root_commitment: "9".into(),
            cards: cards(SHUFFLE_CARDS, 0),
        }
    }

    #[test]
    fn test_toml_is_byte_exact() {
        let inputs = ProverInputs::new()
            .with("seed", "7")
            .with("root_commitment", "9")
            .with("cards", InputValue::fields(["1", "2"]));
        assert_eq!(
            inputs.to_toml(),
            "seed = \"7\"\nroot_commitment = \"9\"\ncards = [\"1\", \"2\"]\n"
        );
    }

    #[test]
    fn test_toml_bools_are_bare() {
        let inputs = ProverInputs::new()
            .with("folded", InputValue::bool(false))
            .with("status", InputValue::bools([true, false]));
        assert_eq!(inputs.to_toml(), "folded = false\nstatus = [true, false]\n");
    }

    #[test]
    fn test_toml_empty_document() {
        assert_eq!(ProverInputs::new().to_toml(), "");
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut inputs = ProverInputs::new().with("a", 1u64).with("b", 2u64);
        inputs.insert("a", 3u64);
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs.to_toml(), "a = \"3\"\nb = \"2\"\n");
    }

    #[test]
    fn test_field_value_conversions() {
        assert_eq!(FieldValue::from(0u8).as_str(), "0");
        assert_eq!(
            FieldValue::from(u128::MAX).as_str(),
            "340282366920938463463374607431768211455"
        );
        let big = BigUint::parse_bytes(
            b"21888242871839275222246405745257275088548364400416034343698204186575808495616",
            10,
        )
        .unwrap();
        assert_eq!(
            FieldValue::from(big).as_str(),
            "21888242871839275222246405745257275088548364400416034343698204186575808495616"
        );
        // Strings are not reinterpreted.
        assert_eq!(FieldValue::from("0x1f").as_str(), "0x1f");
    }

    #[test]
    fn test_field_value_deserializes_numbers_and_strings() {
        let values: Vec<FieldValue> = serde_json::from_str(r#"[1, "2", 18446744073709551615]"#).unwrap();
        assert_eq!(values[0].as_str(), "1");
        assert_eq!(values[1].as_str(), "2");
        assert_eq!(values[2].as_str(), "18446744073709551615");
        assert_eq!(serde_json::to_string(&values[0]).unwrap(), "\"1\"");
    }

    #[test]
    fn test_shuffle_requires_fifteen_cards() {
        let mut inputs = shuffle_inputs(7);
        inputs.cards.pop();
        let err = serialize_shuffle(&inputs).unwrap_err();
        assert_eq!(
            err,
            InputError::InvalidInputArity {
                field: "cards",
                expected: 15,
                actual: 14
            }
        );
        let msg = err.to_string();
        assert!(msg.contains("15") && msg.contains("14"));
    }

    #[test]
    fn test_shuffle_serializes_in_circuit_order() {
        let toml = serialize_shuffle(&shuffle_inputs(7)).unwrap().to_toml();
        let lines: Vec<&str> = toml.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "seed = \"7\"");
        assert_eq!(lines[1], "root_commitment = \"9\"");
        assert!(lines[2].starts_with("cards = [\"0\", \"1\", "));
        assert!(lines[2].ends_with("\"14\"]"));
    }

    #[test]
    fn test_community_arity() {
        let inputs = CommunityInputs {
            cards: cards(6, 0),
            commitment: "1".into(),
        };
        let err = serialize_community(&inputs).unwrap_err();
        assert!(matches!(
            err,
            InputError::InvalidInputArity { expected: 5, actual: 6, .. }
        ));

        let inputs = CommunityInputs {
            cards: cards(5, 10),
            commitment: "1".into(),
        };
        assert_eq!(
            serialize_community(&inputs).unwrap().to_toml(),
            "cards = [\"10\", \"11\", \"12\", \"13\", \"14\"]\ncommitment = \"1\"\n"
        );
    }

    #[test]
    fn test_reveal_checks_every_array() {
        let valid = RevealInputs {
            cards: cards(10, 0),
            commitments: cards(10, 100),
            players: cards(5, 1000),
            player_status: vec![true, true, false, true, false],
        };
        let toml = serialize_reveal(&valid).unwrap().to_toml();
        assert!(toml.ends_with("player_status = [true, true, false, true, false]\n"));

        let mut bad = valid.clone();
        bad.commitments.truncate(9);
        assert!(matches!(
            serialize_reveal(&bad).unwrap_err(),
            InputError::InvalidInputArity { field: "commitments", expected: 10, actual: 9 }
        ));

        let mut bad = valid.clone();
        bad.players.push("1".into());
        assert!(matches!(
            serialize_reveal(&bad).unwrap_err(),
            InputError::InvalidInputArity { field: "players", expected: 5, actual: 6 }
        ));

        let mut bad = valid;
        bad.player_status.clear();
        assert!(matches!(
            serialize_reveal(&bad).unwrap_err(),
            InputError::InvalidInputArity { field: "player_status", expected: 5, actual: 0 }
        ));
    }

    #[test]
    fn test_circuit_inputs_wire_format() {
        let json = r#"{
            "circuit": "community",
            "inputs": {"cards": ["1", 2, 3, 4, 5], "commitment": "9"}
        }"#;
        let inputs: CircuitInputs = serde_json::from_str(json).unwrap();
        assert_eq!(inputs.kind(), CircuitKind::Community);
        assert_eq!(inputs.to_prover_inputs().unwrap().len(), 2);
    }

    #[test]
    fn test_circuit_inputs_unknown_circuit_rejected() {
        let json = r#"{"circuit": "river", "inputs": {}}"#;
        assert!(serde_json::from_str::<CircuitInputs>(json).is_err());
    }
}
