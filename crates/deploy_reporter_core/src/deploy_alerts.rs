use tracing::{info, warn};

use crate::config::Approver;
use crate::dedup::NotifiedSet;
use crate::notify::{MentionResolver, Notifier, ticket_link};
use crate::tracker::{Assignee, TicketRecord, browse_url};

/// Deploy tickets newly linked to one parent ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployAlert {
    pub parent_key: String,
    pub parent_summary: String,
    pub assignee: Assignee,
    pub deploy_keys: Vec<String>,
}

/// Group inward "is deployed by" links not yet in `notified` by parent.
/// Parents without an assignee are skipped so their keys remain eligible.
pub fn collect_new_deploy_links(tickets: &[TicketRecord], notified: &NotifiedSet) -> Vec<DeployAlert> {
    let mut alerts = Vec::new();
    for ticket in tickets {
        let mut deploy_keys = Vec::new();
        for link in ticket.deployed_by() {
            if !notified.contains(&link.key) && !deploy_keys.contains(&link.key) {
                deploy_keys.push(link.key.clone());
            }
        }
        if deploy_keys.is_empty() {
            continue;
        }
        let Some(assignee) = ticket.assignee.clone() else {
            info!(parent = %ticket.key, "new deploy tickets on unassigned parent; not alerting");
            continue;
        };
        alerts.push(DeployAlert {
            parent_key: ticket.key.clone(),
            parent_summary: ticket.summary.clone(),
            assignee,
            deploy_keys,
        });
    }
    alerts
}

pub fn deploy_alert_message(
    alert: &DeployAlert,
    assignee_mention: &str,
    approver_mentions: &[String],
    parent_url: &str,
) -> String {
    let mut lines = vec![format!(
        "{assignee_mention}님, 담당 IT티켓에 새로운 배포 티켓이 생성되었습니다."
    )];
    if !approver_mentions.is_empty() {
        let approvers = approver_mentions
            .iter()
            .map(|mention| format!("{mention}님"))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("{approvers}, 배포 내용을 확인 후 승인해주세요."));
    }
    lines.push(format!(
        "- {}",
        ticket_link(parent_url, &alert.parent_key, &alert.parent_summary)
    ));
    lines.join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertDelivery {
    pub sent: usize,
    pub notified: NotifiedSet,
}

/// Send one message per alert. A parent's deploy keys join `notified` only
/// when the notifier confirms delivery.
pub fn deliver_alerts<N, M>(
    alerts: &[DeployAlert],
    mut notified: NotifiedSet,
    notifier: &mut N,
    directory: &mut M,
    approvers: &[Approver],
    tracker_url: &str,
) -> AlertDelivery
where
    N: Notifier + ?Sized,
    M: MentionResolver + ?Sized,
{
    if alerts.is_empty() {
        return AlertDelivery { sent: 0, notified };
    }
    let approver_mentions = approvers
        .iter()
        .map(|approver| directory.mention(Some(&approver.email), &approver.name))
        .collect::<Vec<_>>();

    let mut sent = 0;
    for alert in alerts {
        let fallback = if alert.assignee.display_name.trim().is_empty() {
            "담당자"
        } else {
            alert.assignee.display_name.as_str()
        };
        let mention = directory.mention(alert.assignee.email.as_deref(), fallback);
        let message = deploy_alert_message(
            alert,
            &mention,
            &approver_mentions,
            &browse_url(tracker_url, &alert.parent_key),
        );
        match notifier.send(&message) {
            Ok(true) => {
                sent += 1;
                notified.extend(alert.deploy_keys.iter().cloned());
                info!(parent = %alert.parent_key, keys = ?alert.deploy_keys, "deploy alert sent");
            }
            Ok(false) => {
                info!(parent = %alert.parent_key, "deploy alert declined by notifier");
            }
            Err(error) => {
                warn!(parent = %alert.parent_key, error = %format!("{error:#}"), "deploy alert failed");
            }
        }
    }
    AlertDelivery { sent, notified }
}
