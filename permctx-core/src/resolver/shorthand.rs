//! Shorthand permissions: `a.(b|c).d`, `kit.(1-3)`, `zone.(a-c)`.
//!
//! A parenthesised group lists alternatives separated by `|`. An alternative
//! of the form `x-y` with two integers or two single characters is a range.
//! Small patterns are expanded eagerly into the flattened table; every pattern
//! can also be matched lazily against one permission.

use crate::models::node::normalize_permission;

/// Largest number of permissions a shorthand node is expanded into
pub const MAX_EXPANSION: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Choice {
    Literal(String),
    Numbers(i64, i64),
    Chars(char, char),
}

impl Choice {
    fn parse(raw: &str) -> Self {
        if let Some((low, high)) = raw.split_once('-') {
            if let (Ok(low), Ok(high)) = (low.parse::<i64>(), high.parse::<i64>()) {
                if low <= high {
                    return Self::Numbers(low, high);
                }
            }
            let mut low_chars = low.chars();
            let mut high_chars = high.chars();
            if let (Some(low), None, Some(high), None) = (
                low_chars.next(),
                low_chars.next(),
                high_chars.next(),
                high_chars.next(),
            ) {
                if low <= high {
                    return Self::Chars(low, high);
                }
            }
        }
        Self::Literal(raw.to_string())
    }

    fn size(&self) -> usize {
        match self {
            Self::Literal(_) => 1,
            Self::Numbers(low, high) => high
                .checked_sub(*low)
                .and_then(|span| usize::try_from(span).ok())
                .map_or(usize::MAX, |span| span.saturating_add(1)),
            Self::Chars(low, high) => (*high as usize).saturating_sub(*low as usize) + 1,
        }
    }

    fn values(&self) -> Vec<String> {
        match self {
            Self::Literal(text) => vec![text.clone()],
            Self::Numbers(low, high) => (*low..=*high).map(|n| n.to_string()).collect(),
            Self::Chars(low, high) => (*low..=*high).map(String::from).collect(),
        }
    }

    /// Byte lengths of the prefixes of `input` this choice accepts
    fn prefix_lengths(&self, input: &str) -> Vec<usize> {
        match self {
            Self::Literal(text) => {
                if input.starts_with(text.as_str()) {
                    vec![text.len()]
                } else {
                    Vec::new()
                }
            }
            Self::Numbers(low, high) => {
                let sign = usize::from(input.starts_with('-'));
                let digits = input[sign..]
                    .bytes()
                    .take_while(u8::is_ascii_digit)
                    .count();
                (1..=digits)
                    .map(|len| sign + len)
                    .filter(|&len| {
                        // Only the canonical spelling matches, as expansion
                        // never produces `01` or `-0`
                        let candidate = &input[..len];
                        candidate.parse::<i64>().is_ok_and(|n| {
                            (*low..=*high).contains(&n) && n.to_string() == candidate
                        })
                    })
                    .collect()
            }
            Self::Chars(low, high) => match input.chars().next() {
                Some(c) if (*low..=*high).contains(&c) => vec![c.len_utf8()],
                _ => Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Group(Vec<Choice>),
}

/// A parsed shorthand permission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShorthandPattern {
    parts: Vec<Part>,
}

impl ShorthandPattern {
    /// Parse `permission`; `None` when it contains no well-formed group.
    ///
    /// The pattern is lowercased, matching how lookups are normalised.
    #[must_use]
    pub fn parse(permission: &str) -> Option<Self> {
        let permission = normalize_permission(permission);
        let mut parts = Vec::new();
        let mut rest = permission.as_str();
        let mut has_group = false;

        while let Some(open) = rest.find('(') {
            let close = open + rest[open..].find(')')?;
            let inner = &rest[open + 1..close];
            if inner.contains('(') {
                return None;
            }

            if open > 0 {
                parts.push(Part::Literal(rest[..open].to_string()));
            }
            let choices: Vec<Choice> = inner
                .split('|')
                .filter(|c| !c.is_empty())
                .map(Choice::parse)
                .collect();
            if choices.is_empty() {
                return None;
            }
            parts.push(Part::Group(choices));
            has_group = true;
            rest = &rest[close + 1..];
        }

        if rest.contains(')') {
            return None;
        }
        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_string()));
        }

        has_group.then_some(Self { parts })
    }

    /// Number of permissions the pattern expands to, saturating
    #[must_use]
    pub fn expansion_size(&self) -> usize {
        self.parts.iter().fold(1usize, |acc, part| match part {
            Part::Literal(_) => acc,
            Part::Group(choices) => {
                let size = choices
                    .iter()
                    .fold(0usize, |sum, c| sum.saturating_add(c.size()));
                acc.saturating_mul(size)
            }
        })
    }

    /// Every permission the pattern stands for, or `None` above
    /// [`MAX_EXPANSION`]
    #[must_use]
    pub fn expand(&self) -> Option<Vec<String>> {
        if self.expansion_size() > MAX_EXPANSION {
            return None;
        }

        let mut expanded = vec![String::new()];
        for part in &self.parts {
            match part {
                Part::Literal(text) => {
                    for permission in &mut expanded {
                        permission.push_str(text);
                    }
                }
                Part::Group(choices) => {
                    let values: Vec<String> = choices.iter().flat_map(Choice::values).collect();
                    expanded = expanded
                        .iter()
                        .flat_map(|prefix| values.iter().map(move |v| format!("{prefix}{v}")))
                        .collect();
                }
            }
        }
        Some(expanded)
    }

    /// Whether the lowercase `permission` is one of the expansions
    #[must_use]
    pub fn matches(&self, permission: &str) -> bool {
        matches_parts(&self.parts, permission)
    }
}

fn matches_parts(parts: &[Part], input: &str) -> bool {
    let Some((first, rest)) = parts.split_first() else {
        return input.is_empty();
    };

    match first {
        Part::Literal(text) => input
            .strip_prefix(text.as_str())
            .is_some_and(|remaining| matches_parts(rest, remaining)),
        Part::Group(choices) => choices.iter().any(|choice| {
            choice
                .prefix_lengths(input)
                .into_iter()
                .any(|len| matches_parts(rest, &input[len..]))
        }),
    }
}
