//! Ticket chains.
//!
//! Granting tickets record the tickets issued from them (see
//! [`crate::tracking`]). Following those records from a root yields the
//! tree of tickets that lose their meaning when the root goes away.

use std::collections::{HashSet, VecDeque};

use crate::TicketResult;
use crate::model::Ticket;
use crate::registry::TicketRegistry;

/// Collects `root` and every ticket reachable through tracking records.
///
/// Ids come back in breadth-first order, `root` first. Tracked service and
/// proxy tickets are leaves; tracked proxy-granting tickets are loaded and
/// descended into. A tracked id that no longer exists is still returned.
///
/// # Errors
///
/// Returns an error if loading a proxy-granting ticket fails.
pub async fn collect_descendants<R>(registry: &R, root: &Ticket) -> TicketResult<Vec<String>>
where
    R: TicketRegistry + ?Sized,
{
    let mut ordered = vec![root.id().to_owned()];
    let mut visited: HashSet<String> = HashSet::from([root.id().to_owned()]);
    let mut queue = VecDeque::from([root.clone()]);

    while let Some(ticket) = queue.pop_front() {
        let Some(grant) = ticket.as_granting() else {
            continue;
        };
        for id in grant.services.keys() {
            if visited.insert(id.clone()) {
                ordered.push(id.clone());
            }
        }
        for id in grant.proxy_granting_tickets.keys() {
            if !visited.insert(id.clone()) {
                continue;
            }
            ordered.push(id.clone());
            if let Some(pgt) = registry.get_ticket_unchecked(id).await? {
                queue.push_back(pgt);
            }
        }
    }

    Ok(ordered)
}

/// Walks from `ticket` up to its root, returning the chain child first.
///
/// # Returns
///
/// `None` if any ticket on the way is missing.
///
/// # Errors
///
/// Returns an error if a lookup fails.
pub async fn granting_chain<R>(registry: &R, ticket: &Ticket) -> TicketResult<Option<Vec<Ticket>>>
where
    R: TicketRegistry + ?Sized,
{
    let mut chain = Vec::new();
    let mut seen = HashSet::from([ticket.id().to_owned()]);
    let mut next = ticket.granting_ticket_id().map(str::to_owned);

    while let Some(parent_id) = next {
        if !seen.insert(parent_id.clone()) {
            tracing::warn!(ticket_id = %ticket.id(), "Cycle in granting chain");
            return Ok(None);
        }
        let Some(parent) = registry.get_ticket_unchecked(&parent_id).await? else {
            return Ok(None);
        };
        next = parent.granting_ticket_id().map(str::to_owned);
        chain.push(parent);
    }

    Ok(Some(chain))
}
