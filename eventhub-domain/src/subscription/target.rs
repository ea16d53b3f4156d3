use crate::task::EventTargets;
use std::collections::BTreeSet;

/// 判断消息/命令是否投递给给定订阅者
///
/// 依次检查客户端、用户、用户组列表，任一命中即投递；
/// 未提供任何目标列表时广播；提供了列表但均未命中时不投递。
/// 消息名是否被订阅由 `SubscriptionSet::matches_message` 另行判断，两者需同时成立。
pub fn accepts_target(
    targets: Option<&EventTargets>,
    client_id: &str,
    user_id: &str,
    groups: &BTreeSet<String>,
) -> bool {
    let Some(targets) = targets else {
        return true;
    };
    if targets.is_broadcast() {
        return true;
    }

    if let Some(clients) = &targets.clients {
        if clients.iter().any(|c| c == client_id) {
            return true;
        }
    }
    if let Some(users) = &targets.users {
        if users.iter().any(|u| u == user_id) {
            return true;
        }
    }
    if let Some(target_groups) = &targets.groups {
        if target_groups.iter().any(|g| groups.contains(g)) {
            return true;
        }
    }
    false
}
