use super::{alice, bob, carol, HOUR, MINUTE};
use crate::auction::*;
use anyhow::Result;

const T0: Timestamp = 1_000_000;
const DAY: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

fn ms(d: std::time::Duration) -> Timestamp {
    d.as_millis() as Timestamp
}

fn listed(price: Amount) -> Item {
    let mut item = Item::listing("Cargo pants", "", price, T0);
    item.id = "item-1".to_owned();
    item
}

#[test]
fn mine_claim_takes_the_listed_price() -> Result<()> {
    let item = listed(500).claim(ClaimKind::Mine, &alice(), T0 + 10)?;

    assert_eq!(item.status, ItemStatus::Mine);
    assert_eq!(item.current_bid, 500);
    assert_eq!(item.current_bidder.as_deref(), Some("u1"));
    assert_eq!(
        item.mine_claim,
        Some(Claim {
            user_id: "u1".to_owned(),
            user_name: "Alice".to_owned(),
            claimed_at: T0 + 10,
        })
    );
    assert_eq!(item.grab_claim, None);
    assert_eq!(
        item.bid_history,
        vec![BidEntry {
            user_id: "u1".to_owned(),
            user_name: "Alice".to_owned(),
            bid_amount: 500,
            bid_type: BidType::Mine,
            timestamp: T0 + 10,
        }]
    );
    assert_eq!(item.updated_at, T0 + 10);
    Ok(())
}

#[test]
fn first_claim_locks_out_the_other_kind() -> Result<()> {
    let mine = listed(100).claim(ClaimKind::Mine, &alice(), T0)?;
    assert_eq!(
        mine.claim(ClaimKind::Grab, &bob(), T0 + 1),
        Err(TransitionError::AlreadyClaimed(ClaimKind::Mine))
    );
    assert_eq!(
        mine.claim(ClaimKind::Mine, &bob(), T0 + 1),
        Err(TransitionError::AlreadyClaimed(ClaimKind::Mine))
    );

    let grab = listed(100).claim(ClaimKind::Grab, &alice(), T0)?;
    assert_eq!(grab.status, ItemStatus::Grab);
    assert_eq!(
        grab.claim(ClaimKind::Mine, &bob(), T0 + 1),
        Err(TransitionError::AlreadyClaimed(ClaimKind::Grab))
    );
    Ok(())
}

#[test]
fn steal_needs_a_claimed_item() {
    assert_eq!(
        listed(100).steal(&bob(), 200, T0),
        Err(TransitionError::NotClaimed)
    );
}

#[test]
fn steal_must_strictly_beat_the_current_bid() -> Result<()> {
    let item = listed(500).claim(ClaimKind::Mine, &alice(), T0)?;

    assert_eq!(
        item.steal(&bob(), 450, T0 + 1),
        Err(TransitionError::TooLow {
            current: 500,
            offered: 450
        })
    );
    assert_eq!(
        item.steal(&bob(), 500, T0 + 1),
        Err(TransitionError::TooLow {
            current: 500,
            offered: 500
        })
    );
    assert_eq!(item.steal(&bob(), 0, T0 + 1), Err(TransitionError::ZeroAmount));

    let item = item.steal(&bob(), 600, T0 + 2)?;
    assert_eq!(item.status, ItemStatus::Mine);
    assert_eq!(item.current_bid, 600);
    assert_eq!(item.current_bidder.as_deref(), Some("u2"));
    assert_eq!(item.bid_history.len(), 2);
    assert_eq!(item.bid_history[1].bid_type, BidType::Steal);
    // the claim itself stays with the original claimant
    assert_eq!(item.mine_claim.as_ref().map(|c| c.user_id.as_str()), Some("u1"));

    let item = item.steal(&carol(), 601, T0 + 3)?;
    let amounts: Vec<_> = item.bid_history.iter().map(|e| e.bid_amount).collect();
    assert_eq!(amounts, vec![500, 600, 601]);
    Ok(())
}

#[test]
fn finalize_waits_for_the_claim_window() -> Result<()> {
    let unclaimed = listed(100);
    assert_eq!(unclaimed.finalize(T0 + ms(DAY) * 2, DAY), Finalization::NotDue);

    let item = listed(100).claim(ClaimKind::Grab, &alice(), T0)?;
    assert_eq!(item.first_claimed_at(), Some(T0));
    assert_eq!(
        item.finalize(T0 + ms(DAY) - ms(MINUTE), DAY),
        Finalization::NotDue
    );

    let Finalization::Sold(sold) = item.finalize(T0 + ms(DAY), DAY) else {
        panic!("expected the item to sell exactly at the window");
    };
    assert_eq!(sold.status, ItemStatus::Sold);
    assert_eq!(sold.sold_at, Some(T0 + ms(DAY)));
    assert_eq!(sold.finalize(T0 + ms(DAY) + ms(HOUR), DAY), Finalization::AlreadySold);
    Ok(())
}

#[test]
fn sold_items_are_frozen() -> Result<()> {
    let item = listed(100)
        .claim(ClaimKind::Mine, &alice(), T0)?
        .steal(&bob(), 150, T0 + 1)?;
    let Finalization::Sold(sold) = item.finalize(T0 + ms(DAY), DAY) else {
        panic!("expected a sale");
    };

    assert_eq!(
        sold.claim(ClaimKind::Grab, &carol(), T0 + ms(DAY) + 1),
        Err(TransitionError::AlreadySold)
    );
    assert_eq!(
        sold.steal(&carol(), 1_000, T0 + ms(DAY) + 1),
        Err(TransitionError::AlreadySold)
    );
    assert_eq!(sold.ensure_deletable(), Err(TransitionError::AlreadySold));
    assert_eq!(sold.current_bid, 150);
    assert_eq!(sold.bid_history.len(), 2);
    Ok(())
}

#[test]
fn status_strings_parse_back() -> Result<()> {
    for status in [
        ItemStatus::Available,
        ItemStatus::Mine,
        ItemStatus::Grab,
        ItemStatus::Sold,
    ] {
        assert_eq!(status.as_str().parse::<ItemStatus>()?, status);
    }
    assert!("stolen".parse::<ItemStatus>().is_err());
    assert_eq!("steal".parse::<BidType>()?, BidType::Steal);
    Ok(())
}
