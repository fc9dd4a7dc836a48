/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CRYBB Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::limiter::normalize_handle;
use crate::x_api::MentionEntity;

/// Pick the reply target from a mention's entity list.
///
/// The first entity right after the leftmost `@bot` wins; otherwise the
/// leftmost entity that is neither the bot nor the author; otherwise the
/// author themselves. Entities are expected in textual order.
pub fn extract_reply_target(
    entities: &[MentionEntity],
    bot_handle: &str,
    author_handle: &str,
) -> String {
    let bot = normalize_handle(bot_handle);
    let author = normalize_handle(author_handle);

    if entities.is_empty() {
        return author_handle.to_string();
    }

    let bot_idx = entities
        .iter()
        .position(|m| normalize_handle(&m.username) == bot);

    if let Some(idx) = bot_idx {
        if let Some(next) = entities.get(idx + 1) {
            if normalize_handle(&next.username) != bot {
                return next.username.clone();
            }
        }
    }

    for m in entities {
        let u = normalize_handle(&m.username);
        if u != bot && u != author {
            return m.username.clone();
        }
    }

    author_handle.to_string()
}

const SIZE_TOKENS: [&str; 4] = ["normal", "bigger", "mini", "400x400"];

/// Swap the size token of a profile-image URL for `400x400`. URLs without
/// a recognized `_<token>.<ext>` tail pass through unchanged.
pub fn normalize_pfp_url(url: &str) -> String {
    let Some(dot) = url.rfind('.') else {
        return url.to_string();
    };
    let (stem, ext) = url.split_at(dot);
    let Some(underscore) = stem.rfind('_') else {
        return url.to_string();
    };
    let token = &stem[underscore + 1..];
    if !SIZE_TOKENS.contains(&token) {
        return url.to_string();
    }
    format!("{}_400x400{}", &stem[..underscore], ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ents(names: &[&str]) -> Vec<MentionEntity> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| MentionEntity {
                username: n.to_string(),
                start: (i * 10) as u32,
                end: (i * 10 + n.len()) as u32,
            })
            .collect()
    }

    #[test]
    fn picks_entity_after_bot() {
        let e = ents(&["crybbmaker", "alice"]);
        assert_eq!(extract_reply_target(&e, "crybbmaker", "eve"), "alice");
    }

    #[test]
    fn falls_back_to_author_when_bot_is_alone() {
        let e = ents(&["crybbmaker"]);
        assert_eq!(extract_reply_target(&e, "crybbmaker", "eve"), "eve");
    }

    #[test]
    fn handle_comparison_is_case_insensitive() {
        let e = ents(&["CryBBMaker", "Alice"]);
        assert_eq!(extract_reply_target(&e, "@crybbmaker", "eve"), "Alice");
    }

    #[test]
    fn skips_duplicate_bot_entity_after_bot() {
        let e = ents(&["crybbmaker", "crybbmaker", "bob"]);
        assert_eq!(extract_reply_target(&e, "crybbmaker", "eve"), "bob");
    }

    #[test]
    fn without_bot_entity_prefers_non_author() {
        let e = ents(&["eve", "carol"]);
        assert_eq!(extract_reply_target(&e, "crybbmaker", "eve"), "carol");
    }

    #[test]
    fn all_entities_are_bot_or_author() {
        let e = ents(&["crybbmaker", "eve"]);
        // Entity after the bot is the author, which is a valid next target.
        assert_eq!(extract_reply_target(&e, "crybbmaker", "eve"), "eve");
    }

    #[test]
    fn empty_entities_fall_back_to_author() {
        assert_eq!(extract_reply_target(&[], "crybbmaker", "eve"), "eve");
    }

    #[test]
    fn extraction_is_deterministic() {
        let e = ents(&["crybbmaker", "alice", "bob"]);
        let a = extract_reply_target(&e, "crybbmaker", "eve");
        let b = extract_reply_target(&e, "crybbmaker", "eve");
        assert_eq!(a, b);
    }

    #[test]
    fn pfp_size_tokens_upgrade() {
        assert_eq!(
            normalize_pfp_url("https://img.invalid/u/abc_normal.jpg"),
            "https://img.invalid/u/abc_400x400.jpg"
        );
        assert_eq!(
            normalize_pfp_url("https://img.invalid/u/abc_bigger.png"),
            "https://img.invalid/u/abc_400x400.png"
        );
        assert_eq!(
            normalize_pfp_url("https://img.invalid/u/abc_mini.jpg"),
            "https://img.invalid/u/abc_400x400.jpg"
        );
        assert_eq!(
            normalize_pfp_url("https://img.invalid/u/abc_400x400.jpg"),
            "https://img.invalid/u/abc_400x400.jpg"
        );
    }

    #[test]
    fn pfp_without_size_token_passes_through() {
        assert_eq!(
            normalize_pfp_url("https://img.invalid/u/plain.jpg"),
            "https://img.invalid/u/plain.jpg"
        );
        assert_eq!(normalize_pfp_url(""), "");
        assert_eq!(
            normalize_pfp_url("https://img.invalid/u/no_ext_here"),
            "https://img.invalid/u/no_ext_here"
        );
    }
}
