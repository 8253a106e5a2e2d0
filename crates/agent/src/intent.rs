//! Ordered rule table mapping free text to inventory intents.
//!
//! Rules are tried top to bottom and the first match wins. The order is part
//! of the contract: several phrasings match more than one pattern (`thuê`
//! appears in rent commands and in "who is renting" questions), and the
//! earlier rule is the one that answers.
//!
//! | # | Intent            | Recognised phrasing                                        |
//! |---|-------------------|------------------------------------------------------------|
//! | 1 | BulkDeviceList    | 2+ lines of `<description><sep><qty>`                       |
//! | 2 | WhoIsRenting      | `ai (đang) thuê/mượn/giữ <id>`, `who is renting <id>`        |
//! | 3 | WhatAmIRenting    | `<who> (đang) thuê/mượn gì`, `what am I renting`            |
//! | 4 | ListAvailable     | `thiết bị còn trống`, `còn gì`, `available`                 |
//! | 5 | ListDevices       | `danh sách`, `liệt kê`, `xem kho`, `list devices`           |
//! | 6 | ReturnDevice      | `trả (lại)/hoàn trả/return <id> [qty]` anywhere in the line |
//! | 7 | RentDevice        | `thuê/mượn/rent/borrow <id> [qty]` anywhere in the line     |
//! | 8 | DeleteDevice      | `xoá/gỡ/delete/remove <id>`                                 |
//! | 9 | AddOrUpdateDevice | `thêm/cập nhật/sửa/add/update <id> [description] [, qty]`   |
//! |10 | DescribeDevice    | `thông tin/mô tả/chi tiết/tìm/info/describe <query>`        |

use regex::{Captures, Regex};
use thiserror::Error;

use rentdesk_core::bulk::{self, BulkLine, BulkParseError};
use rentdesk_core::{text, BorrowerId, DeviceId};

use crate::gate::AddressGate;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntentKind {
    BulkDeviceList,
    WhoIsRenting,
    WhatAmIRenting,
    ListAvailable,
    ListDevices,
    ReturnDevice,
    RentDevice,
    DeleteDevice,
    AddOrUpdateDevice,
    DescribeDevice,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BulkDeviceList => "bulk_device_list",
            Self::WhoIsRenting => "who_is_renting",
            Self::WhatAmIRenting => "what_am_i_renting",
            Self::ListAvailable => "list_available",
            Self::ListDevices => "list_devices",
            Self::ReturnDevice => "return_device",
            Self::RentDevice => "rent_device",
            Self::DeleteDevice => "delete_device",
            Self::AddOrUpdateDevice => "add_or_update_device",
            Self::DescribeDevice => "describe_device",
        }
    }

    pub fn mutates(&self) -> bool {
        matches!(
            self,
            Self::BulkDeviceList
                | Self::ReturnDevice
                | Self::RentDevice
                | Self::DeleteDevice
                | Self::AddOrUpdateDevice
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intent {
    AddOrUpdateDevice { id: DeviceId, description: Option<String>, quantity: Option<u32> },
    DeleteDevice { id: DeviceId },
    DescribeDevice { query: String },
    ListDevices,
    ListAvailable,
    RentDevice { id: DeviceId, quantity: u32 },
    ReturnDevice { id: DeviceId, quantity: u32 },
    WhoIsRenting { id: DeviceId },
    /// `None` means the sender.
    WhatAmIRenting { borrower: Option<BorrowerId> },
    BulkDeviceList { lines: Vec<BulkLine> },
    /// A recognised command whose quantity is present but not a positive integer.
    Malformed { kind: IntentKind, raw_quantity: String },
}

impl Intent {
    pub fn kind(&self) -> IntentKind {
        match self {
            Self::AddOrUpdateDevice { .. } => IntentKind::AddOrUpdateDevice,
            Self::DeleteDevice { .. } => IntentKind::DeleteDevice,
            Self::DescribeDevice { .. } => IntentKind::DescribeDevice,
            Self::ListDevices => IntentKind::ListDevices,
            Self::ListAvailable => IntentKind::ListAvailable,
            Self::RentDevice { .. } => IntentKind::RentDevice,
            Self::ReturnDevice { .. } => IntentKind::ReturnDevice,
            Self::WhoIsRenting { .. } => IntentKind::WhoIsRenting,
            Self::WhatAmIRenting { .. } => IntentKind::WhatAmIRenting,
            Self::BulkDeviceList { .. } => IntentKind::BulkDeviceList,
            Self::Malformed { kind, .. } => *kind,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("invalid pattern for {kind:?}: {source}")]
    Pattern {
        kind: IntentKind,
        #[source]
        source: regex::Error,
    },
}

enum Matcher {
    Bulk,
    Patterns(Vec<Regex>),
}

struct IntentRule {
    kind: IntentKind,
    matcher: Matcher,
}

const RULE_TABLE: &[(IntentKind, &[&str])] = &[
    (IntentKind::BulkDeviceList, &[]),
    (
        IntentKind::WhoIsRenting,
        &[
            r"(?i)(?:^|\s)ai\s+(?:đang\s+)?(?:thuê|mượn|giữ)\s+(?:thiết\s+bị\s+)?(?P<id>\S+)",
            r"(?i)\bwho\s+(?:is\s+renting|is\s+borrowing|rents|rented|has)\s+(?P<id>\S+)",
        ],
    ),
    (
        IntentKind::WhatAmIRenting,
        &[
            r"(?i)(?:^|\s)(?:(?P<who>@?\S+)\s+)?(?:đang\s+)?(?:thuê|mượn|giữ)\s+(?:những\s+)?(?:thiết\s+bị\s+|cái\s+)?gì(?:\s|$)",
            r"(?i)\bwhat\s+am\s+i\s+(?:renting|borrowing)\b",
            r"(?i)\bwhat\s+(?:is|does)\s+(?P<who>@?\S+)\s+(?:renting|borrowing|rent|have)\b",
        ],
    ),
    (
        IntentKind::ListAvailable,
        &[
            r"(?i)\bthiết\s+bị\s+còn\s+(?:trống|lại|sẵn)",
            r"(?i)(?:^|\s)còn\s+(?:gì|những\s+gì|trống|thiết\s+bị\s+nào|máy\s+nào)(?:\s|$)",
            r"(?i)\bavailable\b",
        ],
    ),
    (
        IntentKind::ListDevices,
        &[
            r"(?i)\bdanh\s+sách(?:\s+thiết\s+bị)?\b",
            r"(?i)\bliệt\s+kê\b",
            r"(?i)\bxem\s+kho\b",
            r"(?i)^kho$",
            r"(?i)\blist\s+devices\b",
            r"(?i)^(?:devices|inventory)$",
        ],
    ),
    (
        IntentKind::ReturnDevice,
        &[r"(?i)(?:^|\s)(?:trả\s+lại|hoàn\s+trả|trả|return)\s+(?P<args>.+)$"],
    ),
    (
        IntentKind::RentDevice,
        &[r"(?i)(?:^|\s)(?:thuê|mượn|rent|borrow)\s+(?P<args>.+)$"],
    ),
    (
        IntentKind::DeleteDevice,
        &[r"(?i)^(?:xoá|xóa|gỡ|delete|remove)\s+(?:thiết\s+bị\s+)?(?P<id>\S+)"],
    ),
    (
        IntentKind::AddOrUpdateDevice,
        &[r"(?i)^(?:thêm|cập\s+nhật|sửa|add|update)\s+(?:thiết\s+bị\s+)?(?P<id>\S+)(?:\s+(?P<rest>.+))?$"],
    ),
    (
        IntentKind::DescribeDevice,
        &[r"(?i)^(?:thông\s+tin|mô\s+tả|chi\s+tiết|tìm|info|describe)\s+(?:về\s+)?(?:thiết\s+bị\s+)?(?P<query>.+)$"],
    ),
];

const SELF_PRONOUNS: &[&str] = &["toi", "minh", "em", "tao", "to", "i", "me", "dang"];
const FILLER_WORDS: &[&str] = &["thiết", "bị", "cái", "chiếc", "device", "the"];
const QUANTITY_KEYWORDS: &[&str] = &["sl", "số lượng", "qty", "quantity"];

pub struct IntentClassifier {
    rules: Vec<IntentRule>,
    gate: AddressGate,
}

impl IntentClassifier {
    pub fn new(gate: AddressGate) -> Result<Self, ClassifierError> {
        let rules = RULE_TABLE
            .iter()
            .map(|(kind, patterns)| {
                let matcher = if *kind == IntentKind::BulkDeviceList {
                    Matcher::Bulk
                } else {
                    let compiled = patterns
                        .iter()
                        .map(|pattern| {
                            Regex::new(pattern)
                                .map_err(|source| ClassifierError::Pattern { kind: *kind, source })
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    Matcher::Patterns(compiled)
                };
                Ok(IntentRule { kind: *kind, matcher })
            })
            .collect::<Result<Vec<_>, ClassifierError>>()?;

        Ok(Self { rules, gate })
    }

    /// Rule kinds in evaluation order.
    pub fn precedence(&self) -> Vec<IntentKind> {
        self.rules.iter().map(|rule| rule.kind).collect()
    }

    pub fn gate(&self) -> &AddressGate {
        &self.gate
    }

    pub fn classify(&self, input: &str) -> Option<Intent> {
        self.classify_addressed(input, None)
    }

    /// Like [`classify`](Self::classify), also stripping `@<bot_username>`
    /// mentions so mention-addressed commands read like bare ones.
    pub fn classify_addressed(&self, input: &str, bot_username: Option<&str>) -> Option<Intent> {
        let block = self.gate.strip_addressing(&text::nfc(input), bot_username);
        let line = single_line(&block);

        self.rules.iter().find_map(|rule| match &rule.matcher {
            Matcher::Bulk => match bulk::detect_bulk_block(&block)? {
                Ok(lines) => Some(Intent::BulkDeviceList { lines }),
                Err(BulkParseError::MalformedQuantity { raw, .. }) => {
                    Some(Intent::Malformed { kind: IntentKind::BulkDeviceList, raw_quantity: raw })
                }
                Err(_) => None,
            },
            Matcher::Patterns(patterns) => patterns
                .iter()
                .filter_map(|pattern| pattern.captures(&line))
                .find_map(|captures| build_intent(rule.kind, &captures)),
        })
    }
}

fn single_line(block: &str) -> String {
    let collapsed = block.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_start_matches(|ch: char| ch == ',' || ch == ':' || ch.is_whitespace())
        .trim_end_matches(|ch: char| ch == '.' || ch == '!' || ch == '?' || ch.is_whitespace())
        .to_owned()
}

fn build_intent(kind: IntentKind, captures: &Captures<'_>) -> Option<Intent> {
    match kind {
        IntentKind::WhoIsRenting => {
            let id = clean_token(captures.name("id")?.as_str());
            if id.is_empty() || matches!(text::fold(id).as_str(), "gi" | "nao") {
                return None;
            }
            Some(Intent::WhoIsRenting { id: DeviceId::new(id) })
        }
        IntentKind::WhatAmIRenting => {
            let who = captures.name("who").map(|who| who.as_str());
            // "ai đang thuê gì" asks about everyone, which the full listing answers.
            if who.is_some_and(|who| matches!(text::fold(clean_token(who)).as_str(), "ai" | "who")) {
                return Some(Intent::ListDevices);
            }
            Some(Intent::WhatAmIRenting { borrower: who.and_then(resolve_borrower) })
        }
        IntentKind::ListAvailable => Some(Intent::ListAvailable),
        IntentKind::ListDevices => Some(Intent::ListDevices),
        IntentKind::ReturnDevice | IntentKind::RentDevice => {
            match parse_device_args(captures.name("args")?.as_str()) {
                Ok(args) => {
                    let quantity = args.quantity.unwrap_or(1);
                    Some(if kind == IntentKind::RentDevice {
                        Intent::RentDevice { id: args.id, quantity }
                    } else {
                        Intent::ReturnDevice { id: args.id, quantity }
                    })
                }
                Err(ArgsError::MalformedQuantity(raw_quantity)) => {
                    Some(Intent::Malformed { kind, raw_quantity })
                }
                Err(ArgsError::Missing) => None,
            }
        }
        IntentKind::DeleteDevice => {
            let id = clean_token(captures.name("id")?.as_str());
            (!id.is_empty()).then(|| Intent::DeleteDevice { id: DeviceId::new(id) })
        }
        IntentKind::AddOrUpdateDevice => {
            let id = clean_token(captures.name("id")?.as_str());
            if id.is_empty() {
                return None;
            }
            let rest = captures.name("rest").map(|rest| rest.as_str()).unwrap_or_default();
            match parse_add_rest(rest) {
                Ok((description, quantity)) => Some(Intent::AddOrUpdateDevice {
                    id: DeviceId::new(id),
                    description,
                    quantity,
                }),
                Err(raw_quantity) => Some(Intent::Malformed { kind, raw_quantity }),
            }
        }
        IntentKind::DescribeDevice => {
            let query = captures.name("query")?.as_str().trim();
            (!query.is_empty()).then(|| Intent::DescribeDevice { query: query.to_owned() })
        }
        IntentKind::BulkDeviceList => None,
    }
}

/// A borrower named in a question, or `None` for first-person pronouns.
pub fn resolve_borrower(raw: &str) -> Option<BorrowerId> {
    let cleaned = clean_token(raw);
    if cleaned.is_empty() || SELF_PRONOUNS.contains(&text::fold(cleaned).as_str()) {
        return None;
    }
    Some(BorrowerId::new(cleaned))
}

fn clean_token(raw: &str) -> &str {
    raw.trim().trim_matches(|ch: char| matches!(ch, ',' | '.' | '!' | '?' | ':' | ';' | '`' | '"'))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuantityToken {
    Valid(u32),
    /// Looks like a number but is zero, negative, fractional or too large.
    Invalid(String),
    NotANumber,
}

pub fn parse_quantity(raw: &str) -> QuantityToken {
    let cleaned = clean_token(raw);
    let token = cleaned.trim_start_matches(['x', 'X', '×']);
    if token.is_empty() {
        return QuantityToken::NotANumber;
    }

    if token.chars().all(|ch| ch.is_ascii_digit()) {
        return match token.parse::<u32>() {
            Ok(0) | Err(_) => QuantityToken::Invalid(cleaned.to_owned()),
            Ok(quantity) => QuantityToken::Valid(quantity),
        };
    }

    let unsigned = token.trim_start_matches(['-', '+']);
    let numeric = unsigned.chars().any(|ch| ch.is_ascii_digit())
        && unsigned.chars().all(|ch| ch.is_ascii_digit() || ch == '.' || ch == ',')
        && unsigned.chars().next().is_some_and(|ch| ch.is_ascii_digit());
    if numeric {
        QuantityToken::Invalid(cleaned.to_owned())
    } else {
        QuantityToken::NotANumber
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceArgs {
    pub id: DeviceId,
    pub quantity: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArgsError {
    Missing,
    MalformedQuantity(String),
}

/// `<id> [qty]`, `<qty> <id>`, `<id> x<qty>` or `<id> sl <qty>`. Words after
/// the quantity are ignored.
pub fn parse_device_args(args: &str) -> Result<DeviceArgs, ArgsError> {
    let tokens = args
        .split_whitespace()
        .map(clean_token)
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>();
    let mut rest = skip_fillers(&tokens);

    let first = rest.first().copied().ok_or(ArgsError::Missing)?;
    match parse_quantity(first) {
        QuantityToken::Valid(quantity) => {
            rest = skip_fillers(&rest[1..]);
            let id = rest.first().copied().ok_or(ArgsError::Missing)?;
            Ok(DeviceArgs { id: DeviceId::new(id), quantity: Some(quantity) })
        }
        QuantityToken::Invalid(raw) => Err(ArgsError::MalformedQuantity(raw)),
        QuantityToken::NotANumber => {
            let mut tail = &rest[1..];
            if tail.first().is_some_and(|token| {
                QUANTITY_KEYWORDS.contains(&token.to_lowercase().as_str())
            }) {
                tail = &tail[1..];
            }
            let quantity = match tail.first().map(|token| parse_quantity(token)) {
                Some(QuantityToken::Valid(quantity)) => Some(quantity),
                Some(QuantityToken::Invalid(raw)) => return Err(ArgsError::MalformedQuantity(raw)),
                Some(QuantityToken::NotANumber) | None => None,
            };
            Ok(DeviceArgs { id: DeviceId::new(first), quantity })
        }
    }
}

fn skip_fillers<'a, 'b>(tokens: &'b [&'a str]) -> &'b [&'a str] {
    let skip = tokens
        .iter()
        .take_while(|token| FILLER_WORDS.contains(&token.to_lowercase().as_str()))
        .count();
    &tokens[skip..]
}

/// Splits the text after an add/update identifier into an optional
/// description and an optional quantity. `Err` carries a malformed quantity.
pub fn parse_add_rest(rest: &str) -> Result<(Option<String>, Option<u32>), String> {
    let rest = rest.trim().trim_start_matches([':', '-', '–', '|', '=']).trim();
    if rest.is_empty() {
        return Ok((None, None));
    }

    let (head, last) = match rest.rsplit_once(char::is_whitespace) {
        Some((head, last)) => (head, last),
        None => ("", rest),
    };

    match parse_quantity(last) {
        QuantityToken::Valid(quantity) => Ok((description_from(head), Some(quantity))),
        QuantityToken::Invalid(raw) => Err(raw),
        QuantityToken::NotANumber => match bulk::parse_line(rest) {
            Some((description, 0)) => Err(format!("{description} 0")),
            Some((description, quantity)) => Ok((description_from(&description), Some(quantity))),
            None => Ok((description_from(rest), None)),
        },
    }
}

fn description_from(head: &str) -> Option<String> {
    let mut head = head.trim().trim_end_matches(bulk::SEPARATORS).trim_end();
    let lowered = head.to_lowercase();
    for keyword in QUANTITY_KEYWORDS {
        if lowered == *keyword {
            head = "";
            break;
        }
        if lowered.ends_with(&format!(" {keyword}")) {
            let cut = head.len().saturating_sub(keyword.len());
            if head.is_char_boundary(cut) {
                head = &head[..cut];
            }
            break;
        }
    }
    let head = head.trim().trim_end_matches(bulk::SEPARATORS).trim();
    (!head.is_empty()).then(|| head.to_owned())
}

/// Slash-command surface mapped onto the same intents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InventoryCommand {
    Devices,
    Available,
    Rent,
    Return,
    Mine,
    Who,
    Info,
    Add,
    Delete,
}

impl InventoryCommand {
    pub fn usage(&self) -> &'static str {
        match self {
            Self::Devices => "/devices",
            Self::Available => "/available",
            Self::Rent => "/rent <mã thiết bị> [số lượng]",
            Self::Return => "/return <mã thiết bị> [số lượng]",
            Self::Mine => "/mine [tên người thuê]",
            Self::Who => "/who <mã thiết bị>",
            Self::Info => "/info <mã hoặc mô tả>",
            Self::Add => "/add <mã thiết bị> [mô tả] [, số lượng]",
            Self::Delete => "/delete <mã thiết bị>",
        }
    }

    pub fn to_intent(&self, args: &str) -> Result<Intent, ArgsError> {
        let args = text::nfc(args.trim());
        let first_token = || {
            args.split_whitespace()
                .map(clean_token)
                .find(|token| !token.is_empty())
                .map(str::to_owned)
                .ok_or(ArgsError::Missing)
        };

        match self {
            Self::Devices => Ok(Intent::ListDevices),
            Self::Available => Ok(Intent::ListAvailable),
            Self::Rent => {
                let parsed = parse_device_args(&args)?;
                Ok(Intent::RentDevice { id: parsed.id, quantity: parsed.quantity.unwrap_or(1) })
            }
            Self::Return => {
                let parsed = parse_device_args(&args)?;
                Ok(Intent::ReturnDevice { id: parsed.id, quantity: parsed.quantity.unwrap_or(1) })
            }
            Self::Mine => Ok(Intent::WhatAmIRenting {
                borrower: args.split_whitespace().next().and_then(resolve_borrower),
            }),
            Self::Who => Ok(Intent::WhoIsRenting { id: DeviceId::new(&first_token()?) }),
            Self::Info => {
                if args.is_empty() {
                    return Err(ArgsError::Missing);
                }
                Ok(Intent::DescribeDevice { query: args.clone() })
            }
            Self::Add => {
                let id = first_token()?;
                let rest = args
                    .split_once(char::is_whitespace)
                    .map(|(_, rest)| rest)
                    .unwrap_or_default();
                let (description, quantity) =
                    parse_add_rest(rest).map_err(ArgsError::MalformedQuantity)?;
                Ok(Intent::AddOrUpdateDevice { id: DeviceId::new(&id), description, quantity })
            }
            Self::Delete => Ok(Intent::DeleteDevice { id: DeviceId::new(&first_token()?) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        parse_add_rest, parse_device_args, parse_quantity, ArgsError, Intent, IntentClassifier,
        IntentKind, InventoryCommand, QuantityToken,
    };
    use crate::gate::AddressGate;
    use rentdesk_core::{BorrowerId, DeviceId};

    fn classifier() -> IntentClassifier {
        IntentClassifier::new(AddressGate::new(&["bot".to_owned()])).expect("rules compile")
    }

    fn classify(input: &str) -> Option<Intent> {
        classifier().classify(input)
    }

    #[test]
    fn precedence_is_documented_order() {
        assert_eq!(
            classifier().precedence(),
            vec![
                IntentKind::BulkDeviceList,
                IntentKind::WhoIsRenting,
                IntentKind::WhatAmIRenting,
                IntentKind::ListAvailable,
                IntentKind::ListDevices,
                IntentKind::ReturnDevice,
                IntentKind::RentDevice,
                IntentKind::DeleteDevice,
                IntentKind::AddOrUpdateDevice,
                IntentKind::DescribeDevice,
            ]
        );
    }

    #[test]
    fn who_is_renting_wins_over_rent() {
        assert_eq!(
            classify("ai đang thuê CAM?"),
            Some(Intent::WhoIsRenting { id: DeviceId::new("CAM") })
        );
        assert_eq!(
            classify("who is renting tri"),
            Some(Intent::WhoIsRenting { id: DeviceId::new("TRI") })
        );
    }

    #[test]
    fn what_am_i_renting_resolves_pronouns() {
        assert_eq!(classify("tôi đang thuê gì"), Some(Intent::WhatAmIRenting { borrower: None }));
        assert_eq!(classify("đang mượn gì"), Some(Intent::WhatAmIRenting { borrower: None }));
        assert_eq!(
            classify("@alice thuê gì vậy"),
            Some(Intent::WhatAmIRenting { borrower: Some(BorrowerId::new("alice")) })
        );
        assert_eq!(classify("what am I renting?"), Some(Intent::WhatAmIRenting { borrower: None }));
    }

    #[test]
    fn listing_phrases() {
        assert_eq!(classify("bot ơi thiết bị còn trống"), Some(Intent::ListAvailable));
        assert_eq!(classify("còn gì không"), Some(Intent::ListAvailable));
        assert_eq!(classify("danh sách thiết bị"), Some(Intent::ListDevices));
        assert_eq!(classify("Kho"), Some(Intent::ListDevices));
        assert_eq!(classify("list devices please"), Some(Intent::ListDevices));
    }

    #[test]
    fn rent_and_return_accept_polite_prefixes_and_both_orders() {
        assert_eq!(
            classify("cho mình thuê CAM 2"),
            Some(Intent::RentDevice { id: DeviceId::new("CAM"), quantity: 2 })
        );
        assert_eq!(
            classify("mượn 3 tri"),
            Some(Intent::RentDevice { id: DeviceId::new("TRI"), quantity: 3 })
        );
        assert_eq!(
            classify("Bot, thuê mic."),
            Some(Intent::RentDevice { id: DeviceId::new("MIC"), quantity: 1 })
        );
        assert_eq!(
            classify("mình trả lại CAM x1"),
            Some(Intent::ReturnDevice { id: DeviceId::new("CAM"), quantity: 1 })
        );
        assert_eq!(
            classify("return cam sl 2"),
            Some(Intent::ReturnDevice { id: DeviceId::new("CAM"), quantity: 2 })
        );
    }

    #[test]
    fn malformed_quantities_are_flagged_not_dropped() {
        assert_eq!(
            classify("thuê CAM -1"),
            Some(Intent::Malformed { kind: IntentKind::RentDevice, raw_quantity: "-1".to_owned() })
        );
        assert_eq!(
            classify("trả CAM 0"),
            Some(Intent::Malformed { kind: IntentKind::ReturnDevice, raw_quantity: "0".to_owned() })
        );
        assert_eq!(
            classify("thêm CAM Máy ảnh, 1.5"),
            Some(Intent::Malformed {
                kind: IntentKind::AddOrUpdateDevice,
                raw_quantity: "1.5".to_owned()
            })
        );
    }

    #[test]
    fn device_list_with_a_bad_quantity_is_malformed() {
        assert_eq!(
            classify("Camera A, -3\nCamera B, 2"),
            Some(Intent::Malformed {
                kind: IntentKind::BulkDeviceList,
                raw_quantity: "-3".to_owned()
            })
        );
        assert_eq!(
            classify("bot\nCamera B, 2\nCamera A: 1,5"),
            Some(Intent::Malformed {
                kind: IntentKind::BulkDeviceList,
                raw_quantity: "1,5".to_owned()
            })
        );
    }

    #[test]
    fn bot_mentions_are_stripped_before_matching() {
        let classifier = classifier();
        let classify = |input: &str| classifier.classify_addressed(input, Some("rentdeskbot"));

        assert_eq!(classify("@rentdeskbot xoá CAM"), Some(Intent::DeleteDevice { id: DeviceId::new("CAM") }));
        assert_eq!(
            classify("@RentdeskBot thêm CAM Máy ảnh, 2"),
            Some(Intent::AddOrUpdateDevice {
                id: DeviceId::new("CAM"),
                description: Some("Máy ảnh".to_owned()),
                quantity: Some(2),
            })
        );
        assert!(matches!(
            classify("@rentdeskbot\nCamera A, 3\nCamera B, 1"),
            Some(Intent::BulkDeviceList { lines }) if lines.len() == 2
        ));
        assert_eq!(classify("@rentdeskbot thuê gì"), Some(Intent::WhatAmIRenting { borrower: None }));
        assert_eq!(classify("@rentdeskbot kho"), Some(Intent::ListDevices));
        assert_eq!(
            classify("@rentdeskbot @bob thuê gì"),
            Some(Intent::WhatAmIRenting { borrower: Some(BorrowerId::new("bob")) })
        );
    }

    #[test]
    fn asking_who_rents_what_lists_everything() {
        assert_eq!(classify("ai đang thuê gì"), Some(Intent::ListDevices));
        assert_eq!(classify("bot ơi ai mượn gì vậy?"), Some(Intent::ListDevices));
    }

    #[test]
    fn add_update_delete_describe() {
        assert_eq!(
            classify("thêm thiết bị CAM Máy ảnh Canon, 2"),
            Some(Intent::AddOrUpdateDevice {
                id: DeviceId::new("CAM"),
                description: Some("Máy ảnh Canon".to_owned()),
                quantity: Some(2),
            })
        );
        assert_eq!(
            classify("cập nhật cam sl 5"),
            Some(Intent::AddOrUpdateDevice {
                id: DeviceId::new("CAM"),
                description: None,
                quantity: Some(5),
            })
        );
        assert_eq!(
            classify("add MIC Micro không dây"),
            Some(Intent::AddOrUpdateDevice {
                id: DeviceId::new("MIC"),
                description: Some("Micro không dây".to_owned()),
                quantity: None,
            })
        );
        assert_eq!(classify("xoá CAM"), Some(Intent::DeleteDevice { id: DeviceId::new("CAM") }));
        assert_eq!(
            classify("thông tin máy ảnh"),
            Some(Intent::DescribeDevice { query: "máy ảnh".to_owned() })
        );
    }

    #[test]
    fn bulk_block_wins_over_single_line_rules() {
        let intent = classify("Camera A, 3\nCamera B, 0").expect("bulk intent");
        assert!(matches!(intent, Intent::BulkDeviceList { ref lines } if lines.len() == 2));

        assert_eq!(
            classify("Camera A, 3"),
            None,
            "a single list line is not a bulk block and matches no other rule"
        );
    }

    #[test]
    fn decomposed_input_is_normalised() {
        let decomposed = "thue\u{302} CAM 2";
        assert_eq!(
            classify(decomposed),
            Some(Intent::RentDevice { id: DeviceId::new("CAM"), quantity: 2 })
        );
    }

    #[test]
    fn chit_chat_matches_nothing() {
        assert_eq!(classify("bot ơi hôm nay thời tiết thế nào"), None);
        assert_eq!(classify("xin chào mọi người"), None);
    }

    #[test]
    fn quantity_tokens() {
        assert_eq!(parse_quantity("3"), QuantityToken::Valid(3));
        assert_eq!(parse_quantity("x2"), QuantityToken::Valid(2));
        assert_eq!(parse_quantity("0"), QuantityToken::Invalid("0".to_owned()));
        assert_eq!(parse_quantity("-4"), QuantityToken::Invalid("-4".to_owned()));
        assert_eq!(parse_quantity("99999999999"), QuantityToken::Invalid("99999999999".to_owned()));
        assert_eq!(parse_quantity("XLR"), QuantityToken::NotANumber);
        assert_eq!(parse_quantity("cho"), QuantityToken::NotANumber);
    }

    #[test]
    fn device_args_grammar() {
        assert_eq!(parse_device_args("  "), Err(ArgsError::Missing));
        assert_eq!(parse_device_args("2"), Err(ArgsError::Missing));
        let parsed = parse_device_args("cái CAM cho dự án").expect("args");
        assert_eq!(parsed.id, DeviceId::new("CAM"));
        assert_eq!(parsed.quantity, None);
    }

    #[test]
    fn add_rest_grammar() {
        assert_eq!(parse_add_rest(""), Ok((None, None)));
        assert_eq!(parse_add_rest("3"), Ok((None, Some(3))));
        assert_eq!(parse_add_rest(": Máy ảnh,2"), Ok((Some("Máy ảnh".to_owned()), Some(2))));
        assert_eq!(parse_add_rest("Máy ảnh SL: 4"), Ok((Some("Máy ảnh".to_owned()), Some(4))));
        assert_eq!(parse_add_rest("Máy ảnh, Canon"), Ok((Some("Máy ảnh, Canon".to_owned()), None)));
    }

    #[test]
    fn slash_commands_share_the_grammar() {
        assert_eq!(
            InventoryCommand::Rent.to_intent("cam 2"),
            Ok(Intent::RentDevice { id: DeviceId::new("CAM"), quantity: 2 })
        );
        assert_eq!(
            InventoryCommand::Mine.to_intent(""),
            Ok(Intent::WhatAmIRenting { borrower: None })
        );
        assert_eq!(InventoryCommand::Who.to_intent(""), Err(ArgsError::Missing));
        assert_eq!(
            InventoryCommand::Add.to_intent("MIC Micro, 0"),
            Err(ArgsError::MalformedQuantity("0".to_owned()))
        );
    }
}
