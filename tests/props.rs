//! Property tests for the aggregate fold, the codec round-trip law, and
//! the save/load cycle.

use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use vellum::{
    Aggregate, ApplyError, Codec, Event, EventResolver, JsonCodec, ResolveError, Store,
    backend::memory::InMemory,
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Account {
    balance: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Credited {
    amount: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum AccountEvent {
    Credited(Credited),
}

impl Event<Account> for AccountEvent {
    fn kind(&self) -> &str {
        match self {
            Self::Credited(_) => "credited",
        }
    }

    fn apply(&self, state: &Account) -> Result<Account, ApplyError> {
        match self {
            Self::Credited(event) => Ok(Account {
                balance: state.balance + event.amount,
            }),
        }
    }

    fn encode<C: Codec>(&self, codec: &C) -> Result<Vec<u8>, C::Error> {
        match self {
            Self::Credited(event) => codec.serialize(event),
        }
    }
}

struct AccountEvents;

impl EventResolver<Account> for AccountEvents {
    type Event = AccountEvent;

    fn resolve<C: Codec>(
        &self,
        codec: &C,
        kind: &str,
        data: &[u8],
    ) -> Result<Self::Event, ResolveError<C::Error>> {
        match kind {
            "credited" => Ok(AccountEvent::Credited(
                codec.deserialize(data).map_err(ResolveError::Decode)?,
            )),
            other => Err(ResolveError::UnknownKind {
                kind: other.to_owned(),
            }),
        }
    }
}

fn arb_amount() -> impl Strategy<Value = i64> {
    1i64..=1_000
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("failed to build runtime")
}

proptest! {
    // Applying a sequence of events is the left fold of their transitions,
    // and the version gap equals the sequence length.
    #[test]
    fn aggregate_apply_is_a_left_fold(amounts in prop::collection::vec(arb_amount(), 0..50)) {
        let mut aggregate: Aggregate<Account, AccountEvent> = Aggregate::default();
        for &amount in &amounts {
            aggregate.apply(AccountEvent::Credited(Credited { amount })).unwrap();
        }

        let expected: i64 = amounts.iter().sum();
        prop_assert_eq!(aggregate.state().balance, expected);
        prop_assert_eq!(aggregate.versions().current, amounts.len() as u64);
        prop_assert_eq!(aggregate.events().len(), amounts.len());
    }

    // decode(encode(v)) == v for every supported payload.
    #[test]
    fn codec_round_trips_structurally(amount in any::<i64>(), balance in any::<i64>()) {
        let codec = JsonCodec;

        let event = Credited { amount };
        let bytes = codec.serialize(&event).unwrap();
        prop_assert_eq!(codec.deserialize::<Credited>(&bytes).unwrap(), event);

        let state = Account { balance };
        let bytes = codec.serialize(&state).unwrap();
        prop_assert_eq!(codec.deserialize::<Account>(&bytes).unwrap(), state);
    }

    // Any run of saved batches loads back as their total fold, with
    // contiguous versions and a clean (empty) uncommitted run, whatever
    // the snapshot cadence.
    #[test]
    fn saved_batches_reload_to_their_fold(
        batches in prop::collection::vec(prop::collection::vec(arb_amount(), 1..8), 1..6),
        rate in 1u64..10,
    ) {
        let store = Store::new(InMemory::new())
            .with_resolver(AccountEvents)
            .with_snapshot_rate(rate);
        let id = "acct".to_string();

        let (balance, versions, uncommitted) = runtime().block_on(async {
            let mut total = 0u64;
            for batch in &batches {
                let mut account = if total == 0 {
                    Aggregate::default()
                } else {
                    store.get(&id).await.unwrap()
                };
                assert_eq!(account.versions().initial, total);
                for &amount in batch {
                    account.apply(AccountEvent::Credited(Credited { amount })).unwrap();
                }
                total += batch.len() as u64;
                store.save(&id, &account).await.unwrap();
            }

            let loaded = store.get(&id).await.unwrap();
            (loaded.state().balance, loaded.versions(), loaded.events().len())
        });

        let expected: i64 = batches.iter().flatten().sum();
        let count: u64 = batches.iter().map(|b| b.len() as u64).sum();
        prop_assert_eq!(balance, expected);
        prop_assert_eq!(versions.initial, count);
        prop_assert_eq!(versions.current, count);
        prop_assert!(versions.state <= versions.initial);
        prop_assert_eq!(uncommitted, 0);
    }
}
