//! Multi-line device lists such as
//!
//! ```text
//! Máy ảnh Canon, 3
//! Chân máy - 2
//! Micro thu âm: 0
//! ```
//!
//! Every line is `<description><separator><quantity>`. Lines are applied in
//! order; a line that conflicts with the current state is reported and skipped
//! without affecting its neighbours.

use std::fmt;

use thiserror::Error;

use crate::domain::device::DeviceId;
use crate::errors::DomainError;
use crate::inventory::UpsertOutcome;
use crate::ledger::InventoryState;

pub const SEPARATORS: &[char] = &[',', ':', '=', '-', '–', '|'];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BulkLine {
    /// 1-based position among the non-empty lines of the input.
    pub line_no: usize,
    pub description: String,
    pub quantity: u32,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BulkParseError {
    #[error("no device lines found")]
    Empty,
    #[error("line {line_no} is not `<description>, <quantity>`: `{text}`")]
    InvalidLine { line_no: usize, text: String },
    #[error("line {line_no} has an invalid quantity `{raw}`: `{text}`")]
    MalformedQuantity { line_no: usize, text: String, raw: String },
}

/// How a single line reads as a list entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineShape {
    Entry { description: String, quantity: u32 },
    /// Shaped like an entry, but the number is signed, fractional or too large.
    MalformedQuantity { description: String, raw: String },
}

/// Reads one `<description><sep><quantity>` line. The separator is the last
/// one before the trailing number, so descriptions may contain separators.
pub fn classify_line(line: &str) -> Option<LineShape> {
    let line = line.trim();
    let digits_start = line
        .char_indices()
        .rev()
        .take_while(|(_, ch)| ch.is_ascii_digit())
        .last()
        .map(|(index, _)| index)?;
    let mut number_start = digits_start;
    let mut head = &line[..digits_start];

    // `Camera A: 1,5` is a decimal, `Camera 2,5` is "Camera 2" times five.
    if let Some(mark) = head.chars().last().filter(|ch| matches!(ch, '.' | ',')) {
        let before = &head[..head.len() - mark.len_utf8()];
        let int_start = before
            .char_indices()
            .rev()
            .take_while(|(_, ch)| ch.is_ascii_digit())
            .last()
            .map(|(index, _)| index)
            .filter(|index| line[..*index].trim_end().ends_with(SEPARATORS));
        if let Some(int_start) = int_start {
            number_start = int_start;
            head = &line[..int_start];
        }
    }

    // A sign glued to the number is a sign when another separator precedes it
    // (`Camera A, -3`), and the separator itself otherwise (`Camera A -3`).
    if let Some(sign) = head.chars().last().filter(|ch| matches!(ch, '-' | '+')) {
        let before = head[..head.len() - sign.len_utf8()].trim_end();
        if sign == '+' || before.is_empty() || before.ends_with(SEPARATORS) {
            number_start -= sign.len_utf8();
            head = &line[..number_start];
        }
    }

    let head = head.trim_end();
    let separator = head.chars().last().filter(|ch| SEPARATORS.contains(ch))?;
    let description = head[..head.len() - separator.len_utf8()].trim();
    if description.is_empty() {
        return None;
    }

    let raw = &line[number_start..];
    match raw.parse::<u32>() {
        Ok(quantity) if number_start == digits_start => {
            Some(LineShape::Entry { description: description.to_owned(), quantity })
        }
        _ => Some(LineShape::MalformedQuantity {
            description: description.to_owned(),
            raw: raw.to_owned(),
        }),
    }
}

/// Well-formed entries only; see [`classify_line`] for the malformed case.
pub fn parse_line(line: &str) -> Option<(String, u32)> {
    match classify_line(line)? {
        LineShape::Entry { description, quantity } => Some((description, quantity)),
        LineShape::MalformedQuantity { .. } => None,
    }
}

/// Strict parser for operator imports: every non-empty line must parse.
pub fn parse_bulk_lines(input: &str) -> Result<Vec<BulkLine>, BulkParseError> {
    let lines = input
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(index, line)| {
            let line_no = index + 1;
            let text = line.trim().to_owned();
            match classify_line(line) {
                Some(LineShape::Entry { description, quantity }) => {
                    Ok(BulkLine { line_no, description, quantity })
                }
                Some(LineShape::MalformedQuantity { raw, .. }) => {
                    Err(BulkParseError::MalformedQuantity { line_no, text, raw })
                }
                None => Err(BulkParseError::InvalidLine { line_no, text }),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    if lines.is_empty() {
        return Err(BulkParseError::Empty);
    }
    Ok(lines)
}

/// Chat variant: a block of two or more lines that all read as entries counts
/// as a device list. `Some(Err(_))` when one of them carries a malformed
/// quantity, so the block is answered instead of being applied. Anything else
/// is left to the single-line rules.
pub fn detect_bulk_block(input: &str) -> Option<Result<Vec<BulkLine>, BulkParseError>> {
    let non_empty = input.lines().filter(|line| !line.trim().is_empty()).collect::<Vec<_>>();
    if non_empty.len() < 2 || non_empty.iter().any(|line| classify_line(line).is_none()) {
        return None;
    }
    Some(parse_bulk_lines(input))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BulkLineOutcome {
    Created { id: DeviceId, description: String, quantity: u32 },
    Updated { id: DeviceId, description: String, previous: Option<u32>, quantity: u32 },
    Unchanged { id: DeviceId, description: String, quantity: u32 },
    Deleted { id: DeviceId, description: String },
    Skipped { description: String },
    Conflict { description: String, reason: DomainError },
}

impl BulkLineOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, Self::Created { .. } | Self::Updated { .. } | Self::Deleted { .. })
    }
}

impl fmt::Display for BulkLineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created { id, description, quantity } => {
                write!(f, "✅ Đã thêm {id}: {description} (SL: {quantity})")
            }
            Self::Updated { id, description, previous, quantity } => {
                let previous = previous.map_or_else(|| "?".to_owned(), |qty| qty.to_string());
                write!(f, "🔄 Đã cập nhật {id}: {description} (SL: {previous} → {quantity})")
            }
            Self::Unchanged { id, description, quantity } => {
                write!(f, "➖ {id}: {description} không thay đổi (SL: {quantity})")
            }
            Self::Deleted { id, description } => write!(f, "🗑️ Đã xoá {id}: {description}"),
            Self::Skipped { description } => {
                write!(f, "⏭️ Bỏ qua {description}: chưa có trong kho")
            }
            Self::Conflict { description, reason } => write!(f, "{description}: {reason}"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub outcomes: Vec<BulkLineOutcome>,
}

impl BulkReport {
    pub fn changed(&self) -> bool {
        self.outcomes.iter().any(BulkLineOutcome::changed)
    }

    fn count(&self, predicate: impl Fn(&BulkLineOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|outcome| predicate(outcome)).count()
    }

    pub fn summary_line(&self) -> String {
        let created = self.count(|o| matches!(o, BulkLineOutcome::Created { .. }));
        let updated = self.count(|o| matches!(o, BulkLineOutcome::Updated { .. }));
        let deleted = self.count(|o| matches!(o, BulkLineOutcome::Deleted { .. }));
        let skipped = self.count(|o| {
            matches!(o, BulkLineOutcome::Skipped { .. } | BulkLineOutcome::Unchanged { .. })
        });
        let conflicts = self.count(|o| matches!(o, BulkLineOutcome::Conflict { .. }));
        format!(
            "Tổng kết: {created} thêm, {updated} cập nhật, {deleted} xoá, {skipped} bỏ qua, {conflicts} lỗi."
        )
    }

    /// One line per input line in input order, then the summary.
    pub fn render(&self) -> String {
        let mut lines = self.outcomes.iter().map(ToString::to_string).collect::<Vec<_>>();
        lines.push(self.summary_line());
        lines.join("\n")
    }
}

impl InventoryState {
    pub fn apply_bulk(&mut self, lines: &[BulkLine]) -> BulkReport {
        let outcomes = lines.iter().map(|line| self.apply_bulk_line(line)).collect();
        BulkReport { outcomes }
    }

    fn apply_bulk_line(&mut self, line: &BulkLine) -> BulkLineOutcome {
        let existing = self
            .devices
            .find_by_description(&line.description)
            .map(|device| (device.id.clone(), device.description.clone(), device.quantity));

        match (existing, line.quantity) {
            (Some((id, description, _)), 0) => match self.delete_device(&id) {
                Ok(_) => BulkLineOutcome::Deleted { id, description },
                Err(reason) => BulkLineOutcome::Conflict { description, reason },
            },
            (Some((id, description, previous)), quantity) => {
                match self.upsert_device(id.clone(), description.clone(), Some(quantity)) {
                    Ok(UpsertOutcome::Unchanged) => {
                        BulkLineOutcome::Unchanged { id, description, quantity }
                    }
                    Ok(_) => BulkLineOutcome::Updated { id, description, previous, quantity },
                    Err(reason) => BulkLineOutcome::Conflict { description, reason },
                }
            }
            (None, 0) => BulkLineOutcome::Skipped { description: line.description.clone() },
            (None, quantity) => {
                let id = self.devices.generate_id(&line.description);
                match self.upsert_device(id.clone(), line.description.clone(), Some(quantity)) {
                    Ok(_) => BulkLineOutcome::Created {
                        id,
                        description: line.description.clone(),
                        quantity,
                    },
                    Err(reason) => {
                        BulkLineOutcome::Conflict { description: line.description.clone(), reason }
                    }
                }
            }
        }
    }
}
