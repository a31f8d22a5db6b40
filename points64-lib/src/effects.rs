use tracing::{debug, error, info};

use crate::{memory_accessors::MemoryError, sm64::Sm64};

/// Redemption titles must start with this to be treated as commands;
/// anything else is some unrelated reward and is ignored.
pub const COMMAND_PREFIX: char = '!';

/// Canonical lowercase character names and their ids, in the order the
/// character patch declares them. Declaration order breaks resolution ties.
pub const CHARACTERS: [(&str, u8); 8] = [
    ("mario", 0),
    ("luigi", 1),
    ("yoshi", 2),
    ("wario", 3),
    ("peach", 4),
    ("toad", 5),
    ("waluigi", 6),
    ("rosalina", 7),
];

pub const CAP_TYPES: [(&str, &str); 4] = [
    ("normal", "normal"),
    ("wing", "wing"),
    ("metal", "metal"),
    ("vanish", "vanish"),
];

pub const CAMERA_MODES: [(&str, &str); 3] = [
    ("normal", "normal"),
    ("fixed", "fixed"),
    ("freeze", "freeze"),
];

/// Resolves free text against a fixed vocabulary by edit distance. An exact
/// match short-circuits; otherwise the entry with the minimum distance wins,
/// ties going to the earlier entry. Never fails: any query resolves to some
/// entry.
pub fn resolve<'a, T: Copy>(vocabulary: &'a [(&'a str, T)], query: &str) -> (&'a str, T) {
    let mut best = vocabulary[0];
    let mut best_distance = usize::MAX;
    for &(name, value) in vocabulary {
        let distance = levenshtein(name, query);
        if distance == 0 {
            return (name, value);
        }
        if distance < best_distance {
            best_distance = distance;
            best = (name, value);
        }
    }
    best
}

fn levenshtein(a: &str, b: &str) -> usize {
    if a.is_empty() {
        return b.chars().count();
    }
    if b.is_empty() {
        return a.chars().count();
    }

    let b_chars: Vec<char> = b.chars().collect();
    let mut prev_row: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr_row: Vec<usize> = vec![0; b_chars.len() + 1];

    for (i, a_char) in a.chars().enumerate() {
        curr_row[0] = i + 1;
        for (j, b_char) in b_chars.iter().enumerate() {
            let cost = usize::from(a_char != *b_char);
            curr_row[j + 1] = (prev_row[j + 1] + 1)
                .min(curr_row[j] + 1)
                .min(prev_row[j] + cost);
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b_chars.len()]
}

/// Translates one redemption into memory writes. A failing write is logged
/// and the effect abandoned; a single bad redemption must never take the
/// session down.
pub fn dispatch(memory: &Sm64, title: &str, user_input: Option<&str>) {
    let command = title.trim().to_lowercase();
    if !command.starts_with(COMMAND_PREFIX) {
        debug!("ignoring redemption without command prefix: {title:?}");
        return;
    }
    let input = user_input
        .map(|input| input.trim().to_lowercase())
        .filter(|input| !input.is_empty());

    let result = match command.as_str() {
        "!changecharacter" => change_character(memory, input.as_deref().unwrap_or_default()),
        "!changecap" => resolve_and_stage(memory, &command, &CAP_TYPES, input.as_deref()),
        "!changecamera" => resolve_and_stage(memory, &command, &CAMERA_MODES, input.as_deref()),
        _ => stage(memory, &command, input.as_deref()),
    };
    if let Err(err) = result {
        error!("effect {command:?} failed: {err}");
    }
}

fn change_character(memory: &Sm64, query: &str) -> Result<(), MemoryError> {
    let (name, id) = resolve(&CHARACTERS, query);
    info!("changing character to {name} ({id})");
    memory.set_character(id)
}

fn resolve_and_stage<'a>(
    memory: &Sm64,
    command: &str,
    vocabulary: &'a [(&'a str, &'a str)],
    query: Option<&str>,
) -> Result<(), MemoryError> {
    let (_, token) = resolve(vocabulary, query.unwrap_or_default());
    stage(memory, command, Some(token))
}

fn stage(memory: &Sm64, command: &str, argument: Option<&str>) -> Result<(), MemoryError> {
    let message = match argument {
        Some(argument) => format!("{command} {argument}"),
        None => command.to_owned(),
    };
    info!("staging command {message:?}");
    memory.write_command(&message)
}
