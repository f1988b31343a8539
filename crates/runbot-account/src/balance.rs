//! Balance display layer.
//!
//! Computes what balance, currency and flag to show for an account. The
//! server-reported balance is never modified; every policy is a projection
//! of the live balances plus the persisted swap record.
//!
//! At most one policy applies per account, in this order:
//! mirror, legacy swap, alias offset, pass-through.

use runbot_core::{AccountBalance, LoginId, Money};
use runbot_persistence::keys::{ADMIN_MIRROR_MODE_ENABLED, BALANCE_SWAP_STATE, SHOW_AS_CR};
use runbot_persistence::{SessionStore, SessionStoreExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::alias::AliasTable;
use crate::error::AccountResult;

/// One side of a legacy swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwappedAccount {
    pub login_id: LoginId,
    pub original_balance: Money,
    pub swapped_balance: Money,
}

/// Mirror policy: `target` shows `percentage`% of `source`'s live balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorConfig {
    pub source_login_id: LoginId,
    pub target_login_id: LoginId,
    pub percentage: Decimal,
    /// Captured when mirroring is enabled so the target does not jump.
    pub anchor_offset: Money,
}

impl MirrorConfig {
    /// Anchor the projection so that, at enable time, the target keeps
    /// showing `displayed_target`.
    pub fn enable(
        source_login_id: LoginId,
        target_login_id: LoginId,
        percentage: Decimal,
        source_balance: Money,
        displayed_target: Money,
    ) -> Self {
        let anchor_offset = displayed_target - source_balance.percent(percentage);
        Self {
            source_login_id,
            target_login_id,
            percentage,
            anchor_offset,
        }
    }

    pub fn project(&self, source_balance: Money) -> Money {
        source_balance.percent(self.percentage) + self.anchor_offset
    }
}

/// Persisted swap/mirror record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BalanceSwapState {
    pub is_swapped: bool,
    pub is_mirror_mode: bool,
    pub demo_account: Option<SwappedAccount>,
    pub real_account: Option<SwappedAccount>,
    /// Unix milliseconds.
    pub swap_timestamp: Option<u64>,
    pub mirror: Option<MirrorConfig>,
}

impl BalanceSwapState {
    pub fn load(store: &dyn SessionStore) -> Self {
        store.get_or_default(BALANCE_SWAP_STATE)
    }

    pub fn save(&self, store: &dyn SessionStore) -> AccountResult<()> {
        store.set(BALANCE_SWAP_STATE, self)?;
        Ok(())
    }

    /// Legacy swap: `demo` and `real` exchange displayed balances.
    pub fn swapped(demo: &AccountBalance, real: &AccountBalance, timestamp_ms: u64) -> Self {
        Self {
            is_swapped: true,
            is_mirror_mode: false,
            demo_account: Some(SwappedAccount {
                login_id: demo.login_id.clone(),
                original_balance: demo.balance,
                swapped_balance: real.balance,
            }),
            real_account: Some(SwappedAccount {
                login_id: real.login_id.clone(),
                original_balance: real.balance,
                swapped_balance: demo.balance,
            }),
            swap_timestamp: Some(timestamp_ms),
            mirror: None,
        }
    }

    pub fn mirrored(config: MirrorConfig, timestamp_ms: u64) -> Self {
        Self {
            is_mirror_mode: true,
            swap_timestamp: Some(timestamp_ms),
            mirror: Some(config),
            ..Self::default()
        }
    }

    /// Swap partner of `login_id` and the balance stored for it at swap time.
    fn swap_partner(&self, login_id: &LoginId) -> Option<(&SwappedAccount, &SwappedAccount)> {
        if !self.is_swapped {
            return None;
        }
        let demo = self.demo_account.as_ref()?;
        let real = self.real_account.as_ref()?;
        if &demo.login_id == login_id {
            Some((demo, real))
        } else if &real.login_id == login_id {
            Some((real, demo))
        } else {
            None
        }
    }
}

/// Everything the display computation reads besides the balances.
#[derive(Debug, Clone, Copy)]
pub struct DisplayContext<'a> {
    pub swap: &'a BalanceSwapState,
    pub aliases: &'a AliasTable,
    pub alias_mode: bool,
    pub mirror_enabled: bool,
}

impl<'a> DisplayContext<'a> {
    /// Build a context from persisted flags.
    pub fn from_store(
        store: &dyn SessionStore,
        swap: &'a BalanceSwapState,
        aliases: &'a AliasTable,
    ) -> Self {
        Self {
            swap,
            aliases,
            alias_mode: store.get_or_default(SHOW_AS_CR),
            mirror_enabled: store.get_or_default(ADMIN_MIRROR_MODE_ENABLED),
        }
    }
}

/// Projected balance for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayBalance {
    pub balance: Money,
    pub currency: String,
    /// `demo` for virtual accounts, else the lowercase currency code.
    pub flag: String,
    pub is_aliased: bool,
}

impl DisplayBalance {
    fn pass_through(login_id: &LoginId, raw: &AccountBalance) -> Self {
        Self {
            balance: raw.balance,
            currency: raw.currency.clone(),
            flag: flag_for(login_id, &raw.currency),
            is_aliased: false,
        }
    }
}

fn flag_for(login_id: &LoginId, currency: &str) -> String {
    if login_id.is_demo() {
        "demo".to_string()
    } else {
        currency.to_ascii_lowercase()
    }
}

fn live_balance<'b>(all: &'b [AccountBalance], login_id: &LoginId) -> Option<&'b AccountBalance> {
    all.iter().find(|b| &b.login_id == login_id)
}

/// Displayed balance of `login_id`.
///
/// Policies apply only to the active account; every other account is
/// shown as reported.
pub fn compute_display(
    login_id: &LoginId,
    raw: &AccountBalance,
    all_balances: &[AccountBalance],
    is_active: bool,
    ctx: &DisplayContext<'_>,
) -> DisplayBalance {
    if !is_active {
        return DisplayBalance::pass_through(login_id, raw);
    }

    if ctx.mirror_enabled && ctx.swap.is_mirror_mode {
        if let Some(mirror) = ctx
            .swap
            .mirror
            .as_ref()
            .filter(|m| &m.target_login_id == login_id)
        {
            if let Some(source) = live_balance(all_balances, &mirror.source_login_id) {
                return DisplayBalance {
                    balance: mirror.project(source.balance),
                    currency: raw.currency.clone(),
                    flag: flag_for(login_id, &raw.currency),
                    is_aliased: true,
                };
            }
        }
    }

    if let Some((own, partner)) = ctx.swap.swap_partner(login_id) {
        let (balance, currency) = match live_balance(all_balances, &partner.login_id) {
            Some(live) => (live.balance, live.currency.clone()),
            None => (own.swapped_balance, raw.currency.clone()),
        };
        return DisplayBalance {
            flag: flag_for(&partner.login_id, &currency),
            balance,
            currency,
            is_aliased: true,
        };
    }

    if ctx.alias_mode {
        if let Some(entry) = ctx.aliases.by_display(login_id) {
            if let Some(execution) = live_balance(all_balances, &entry.execution_account_id) {
                return DisplayBalance {
                    balance: execution.balance + entry.balance_offset,
                    currency: raw.currency.clone(),
                    flag: flag_for(login_id, &raw.currency),
                    is_aliased: true,
                };
            }
        }
    }

    DisplayBalance::pass_through(login_id, raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::AliasEntry;
    use runbot_persistence::MemoryStore;
    use rust_decimal_macros::dec;

    fn id(s: &str) -> LoginId {
        LoginId::new(s).unwrap()
    }

    fn bal(login: &str, amount: Decimal) -> AccountBalance {
        AccountBalance::new(id(login), Money::new(amount), "USD")
    }

    fn aliases() -> AliasTable {
        AliasTable::new(vec![AliasEntry {
            display_account_id: id("CR100"),
            execution_account_id: id("VRTC200"),
            balance_offset: Money::new(dec!(-9000)),
            id_display_prefix: None,
            continue_across_contracts: false,
        }])
        .unwrap()
    }

    fn balances() -> Vec<AccountBalance> {
        vec![bal("CR100", dec!(50)), bal("VRTC200", dec!(10000))]
    }

    fn ctx<'a>(swap: &'a BalanceSwapState, table: &'a AliasTable) -> DisplayContext<'a> {
        DisplayContext {
            swap,
            aliases: table,
            alias_mode: false,
            mirror_enabled: false,
        }
    }

    #[test]
    fn test_pass_through_by_default() {
        let swap = BalanceSwapState::default();
        let table = aliases();
        let all = balances();

        let shown = compute_display(&id("CR100"), &all[0], &all, true, &ctx(&swap, &table));

        assert_eq!(shown.balance, Money::new(dec!(50)));
        assert_eq!(shown.flag, "usd");
        assert!(!shown.is_aliased);

        let demo = compute_display(&id("VRTC200"), &all[1], &all, true, &ctx(&swap, &table));
        assert_eq!(demo.flag, "demo");
    }

    #[test]
    fn test_alias_offset_projects_execution_balance() {
        let swap = BalanceSwapState::default();
        let table = aliases();
        let all = balances();
        let mut c = ctx(&swap, &table);
        c.alias_mode = true;

        let shown = compute_display(&id("CR100"), &all[0], &all, true, &c);

        assert_eq!(shown.balance, Money::new(dec!(1000)));
        assert_eq!(shown.flag, "usd");
        assert!(shown.is_aliased);
        assert_eq!(all[0].balance, Money::new(dec!(50)));
    }

    #[test]
    fn test_inactive_account_is_never_transformed() {
        let swap = BalanceSwapState::default();
        let table = aliases();
        let all = balances();
        let mut c = ctx(&swap, &table);
        c.alias_mode = true;

        let shown = compute_display(&id("CR100"), &all[0], &all, false, &c);
        assert_eq!(shown.balance, Money::new(dec!(50)));
        assert!(!shown.is_aliased);
    }

    #[test]
    fn test_legacy_swap_exchanges_live_values() {
        let all = balances();
        let swap = BalanceSwapState::swapped(&all[1], &all[0], 1);
        let table = AliasTable::empty();

        let real = compute_display(&id("CR100"), &all[0], &all, true, &ctx(&swap, &table));
        assert_eq!(real.balance, Money::new(dec!(10000)));
        assert_eq!(real.flag, "demo");

        let demo = compute_display(&id("VRTC200"), &all[1], &all, true, &ctx(&swap, &table));
        assert_eq!(demo.balance, Money::new(dec!(50)));
        assert_eq!(demo.flag, "usd");
    }

    #[test]
    fn test_mirror_is_anchored_at_enable_time() {
        // CR100 currently shows 50; mirror 1% of the demo balance from now on.
        let config = MirrorConfig::enable(
            id("VRTC200"),
            id("CR100"),
            dec!(1),
            Money::new(dec!(10000)),
            Money::new(dec!(50)),
        );
        let swap = BalanceSwapState::mirrored(config, 1);
        let table = AliasTable::empty();
        let mut c = ctx(&swap, &table);
        c.mirror_enabled = true;

        let all = balances();
        let at_enable = compute_display(&id("CR100"), &all[0], &all, true, &c);
        assert_eq!(at_enable.balance, Money::new(dec!(50)));

        let later = vec![bal("CR100", dec!(50)), bal("VRTC200", dec!(10200))];
        let after_win = compute_display(&id("CR100"), &later[0], &later, true, &c);
        assert_eq!(after_win.balance, Money::new(dec!(52)));
    }

    #[test]
    fn test_mirror_takes_precedence_over_alias_offset() {
        let config = MirrorConfig::enable(
            id("VRTC200"),
            id("CR100"),
            dec!(10),
            Money::new(dec!(10000)),
            Money::new(dec!(1000)),
        );
        let swap = BalanceSwapState::mirrored(config, 1);
        let table = aliases();
        let c = DisplayContext {
            swap: &swap,
            aliases: &table,
            alias_mode: true,
            mirror_enabled: true,
        };

        let later = vec![bal("CR100", dec!(50)), bal("VRTC200", dec!(11000))];
        let shown = compute_display(&id("CR100"), &later[0], &later, true, &c);

        // Mirror: 10% of 11000 + 0 anchor. Alias offset would give 2000.
        assert_eq!(shown.balance, Money::new(dec!(1100)));
    }

    #[test]
    fn test_mirror_requires_admin_flag() {
        let config = MirrorConfig::enable(
            id("VRTC200"),
            id("CR100"),
            dec!(10),
            Money::new(dec!(10000)),
            Money::new(dec!(1000)),
        );
        let swap = BalanceSwapState::mirrored(config, 1);
        let table = AliasTable::empty();
        let all = balances();

        let shown = compute_display(&id("CR100"), &all[0], &all, true, &ctx(&swap, &table));
        assert_eq!(shown.balance, Money::new(dec!(50)));
    }

    #[test]
    fn test_state_persists_in_camel_case() {
        let store = MemoryStore::new();
        let all = balances();
        let state = BalanceSwapState::swapped(&all[1], &all[0], 42);
        state.save(&store).unwrap();

        let raw = store.get_raw(BALANCE_SWAP_STATE).unwrap().unwrap();
        assert!(raw.contains("\"isSwapped\":true"));
        assert!(raw.contains("\"demoAccount\""));
        assert!(raw.contains("\"loginId\":\"VRTC200\""));
        assert_eq!(BalanceSwapState::load(&store), state);
    }

    #[test]
    fn test_context_reads_flags_from_store() {
        let store = MemoryStore::new();
        store.set(SHOW_AS_CR, &true).unwrap();
        let swap = BalanceSwapState::default();
        let table = AliasTable::empty();

        let c = DisplayContext::from_store(&store, &swap, &table);
        assert!(c.alias_mode);
        assert!(!c.mirror_enabled);
    }
}
