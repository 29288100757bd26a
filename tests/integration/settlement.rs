//! Splitting received payments across recipients.

use super::{payable, TestHarness};
use creditgate::{split, CurrencyId, Error, RecipientId, ShareEntry};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn amounts(plan: &creditgate::DistributionPlan) -> Vec<Decimal> {
    plan.shares.iter().map(|s| s.amount).collect()
}

#[test]
fn test_whole_unit_split_gives_dust_to_last_recipient() {
    let table = vec![
        ShareEntry::new("treasury", dec!(15)),
        ShareEntry::new("creator", dec!(50)),
        ShareEntry::new("operations", dec!(25)),
        ShareEntry::new("referral", dec!(10)),
    ];

    let plan = split(dec!(9999), table, 0).unwrap();

    assert_eq!(amounts(&plan), [dec!(1499), dec!(4999), dec!(2499), dec!(1002)]);
    assert_eq!(plan.allocated(), dec!(9999));
}

#[test]
fn test_settle_uses_currency_granularity() {
    let harness = TestHarness::setup();

    let plan = harness
        .engine
        .settle(dec!(9999), &CurrencyId::new("usdc"))
        .unwrap();
    assert_eq!(
        amounts(&plan),
        [dec!(1499.85), dec!(4999.5), dec!(2499.75), dec!(999.9)]
    );

    // 7 wei: 1.05 -> 1, 3.5 -> 3, 1.75 -> 1, rest 2
    let plan = harness
        .engine
        .settle(dec!(0.000000000000000007), &CurrencyId::new("tok"))
        .unwrap();
    assert_eq!(
        amounts(&plan),
        [
            dec!(0.000000000000000001),
            dec!(0.000000000000000003),
            dec!(0.000000000000000001),
            dec!(0.000000000000000002),
        ]
    );
}

#[tokio::test]
async fn test_quoted_amount_settles_exactly() {
    let harness = TestHarness::setup();
    harness.primary.set_price(Some(dec!(0.2637)));

    let conversion = payable(harness.quote("0xa11ce", "pro", "tok").await.unwrap());
    let plan = harness
        .engine
        .settle(conversion.required_native_amount, &conversion.currency)
        .unwrap();

    assert_eq!(plan.total_amount, conversion.required_native_amount);
    assert_eq!(plan.allocated(), conversion.required_native_amount);
    assert_eq!(
        plan.shares.last().map(|s| s.recipient.clone()),
        Some(RecipientId::new("referral"))
    );
}

#[test]
fn test_settle_rejects_bad_amounts() {
    let harness = TestHarness::setup();
    let usdc = CurrencyId::new("usdc");

    assert!(matches!(
        harness.engine.settle(dec!(1.0000001), &usdc),
        Err(Error::InvalidAmount { .. })
    ));
    assert!(matches!(
        harness.engine.settle(dec!(-5), &usdc),
        Err(Error::InvalidAmount { .. })
    ));
    assert!(matches!(
        harness.engine.settle(dec!(5), &CurrencyId::new("doge")),
        Err(Error::UnknownCurrency(_))
    ));
}
