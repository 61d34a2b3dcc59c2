//! Forum-topic bindings: scope resolution, topic title derivation, rename-
//! on-context-change, and the startup permission check. Grounded on
//! `original_source/src/takopi/telegram/topics.py`. `relay-telegram` has no
//! state-store dependency, so callers pass in whatever context/title they
//! already loaded rather than this module reaching into a store itself.

use relay_outbox::ExecError;

use crate::client::TelegramClient;

/// `cfg.topics.scope` (spec.md's ambient config, §2.3 of SPEC_FULL.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicsScope {
    Main,
    Projects,
    All,
    Auto,
}

/// Resolves `scope` against the main chat id and the set of project chat
/// ids into the concrete set of chats where topic commands are allowed.
pub fn resolve_topics_scope(scope: TopicsScope, main_chat_id: i64, project_chat_ids: &[i64]) -> Vec<i64> {
    let resolved = if scope == TopicsScope::Auto {
        if project_chat_ids.is_empty() {
            TopicsScope::Main
        } else {
            TopicsScope::Projects
        }
    } else {
        scope
    };
    match resolved {
        TopicsScope::Main => vec![main_chat_id],
        TopicsScope::Projects => project_chat_ids.to_vec(),
        TopicsScope::All => {
            let mut ids = vec![main_chat_id];
            ids.extend(project_chat_ids.iter().copied());
            ids
        }
        TopicsScope::Auto => unreachable!("resolved above"),
    }
}

/// `(chat_id, thread_id)` key for a topic-bound message, or `None` if
/// topics aren't enabled, the chat isn't in scope, or the message isn't
/// inside a forum topic.
pub fn topic_key(
    chat_id: i64,
    thread_id: Option<i32>,
    topics_enabled: bool,
    allowed_chat_ids: &[i64],
) -> Option<(i64, i32)> {
    if !topics_enabled || !allowed_chat_ids.contains(&chat_id) {
        return None;
    }
    thread_id.map(|id| (chat_id, id))
}

/// The topic title for a bound `(project?, branch?)` context, e.g.
/// `"myapp @main"`, `"@main"`, or just `"myapp"`; falls back to `"topic"`.
pub fn topic_title(project_alias: Option<&str>, branch: Option<&str>) -> String {
    match (project_alias.filter(|p| !p.is_empty()), branch.filter(|b| !b.is_empty())) {
        (Some(project), Some(branch)) => format!("{project} @{branch}"),
        (None, Some(branch)) => format!("@{branch}"),
        (Some(project), None) => project.to_string(),
        (None, None) => "topic".to_string(),
    }
}

/// Renames the topic if its title differs from `current_title`, returning
/// `true` iff a rename was actually issued.
pub async fn maybe_rename_topic(
    client: &TelegramClient,
    chat_id: i64,
    thread_id: i32,
    current_title: Option<&str>,
    new_title: &str,
) -> Result<bool, ExecError> {
    if current_title == Some(new_title) {
        return Ok(false);
    }
    client.edit_forum_topic(chat_id, thread_id, new_title).await?;
    Ok(true)
}

/// Checks the bot is an admin with `can_manage_topics` in every chat in
/// `chat_ids`, and that each is a forum-enabled supergroup. Returns the
/// first human-readable failure, if any.
pub async fn validate_topics_setup(client: &TelegramClient, chat_ids: &[i64]) -> Result<Option<String>, ExecError> {
    use teloxide::types::ChatMemberKind;

    let me = client.get_me().await?;
    for &chat_id in chat_ids {
        let chat = client.get_chat(chat_id).await?;
        if !chat.is_supergroup() {
            return Ok(Some(format!(
                "topics enabled but chat is not a supergroup (chat_id={chat_id}); convert the group and enable topics."
            )));
        }
        if !chat.is_forum() {
            return Ok(Some(format!(
                "topics enabled but chat does not have topics enabled (chat_id={chat_id}); turn on topics in group settings."
            )));
        }
        let member = client.get_chat_member(chat_id, me.id.0 as i64).await?;
        match member.kind {
            ChatMemberKind::Owner(_) => continue,
            ChatMemberKind::Administrator(ref admin) => {
                if !admin.can_manage_topics {
                    return Ok(Some(format!(
                        "topics enabled but bot lacks manage topics permission (chat_id={chat_id}); grant can_manage_topics."
                    )));
                }
            }
            _ => {
                return Ok(Some(format!(
                    "topics enabled but bot is not an admin (chat_id={chat_id}); promote it and grant manage topics."
                )));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_scope_resolves_to_projects_when_any_exist() {
        let ids = resolve_topics_scope(TopicsScope::Auto, 1, &[2, 3]);
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn auto_scope_resolves_to_main_with_no_projects() {
        let ids = resolve_topics_scope(TopicsScope::Auto, 1, &[]);
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn topic_key_requires_scope_and_thread() {
        assert_eq!(topic_key(1, Some(5), true, &[1]), Some((1, 5)));
        assert_eq!(topic_key(1, None, true, &[1]), None);
        assert_eq!(topic_key(2, Some(5), true, &[1]), None);
        assert_eq!(topic_key(1, Some(5), false, &[1]), None);
    }

    #[test]
    fn topic_title_combines_project_and_branch() {
        assert_eq!(topic_title(Some("myapp"), Some("main")), "myapp @main");
        assert_eq!(topic_title(None, Some("main")), "@main");
        assert_eq!(topic_title(Some("myapp"), None), "myapp");
        assert_eq!(topic_title(None, None), "topic");
    }
}
