use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use streamgrid_macros::NodeEndpoints;

use super::{bind_input, bind_output, BindNode, NodeEndpoints};
use crate::error::DataflowResult;
use crate::registry::{ComparatorFn, ItemJoiner, Key, KeyFn};
use crate::stream::{Item, StreamReceiver, StreamSender};
use crate::stream_id::StreamId;
use crate::task::TaskContext;

/// Sort-merge join of two inputs sorted by their own key functions.
///
/// Which groups produce output is decided entirely by the joiner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, NodeEndpoints)]
#[node_meta(kind = "Join")]
pub struct NodeJoin {
    #[input]
    pub left: StreamId,
    #[input]
    pub right: StreamId,
    pub key_comparator: String,
    pub left_key_function: String,
    pub right_key_function: String,
    pub joiner: String,
    #[output]
    pub output: StreamId,
}

impl NodeJoin {
    pub fn new(
        left: StreamId,
        right: StreamId,
        key_comparator: impl Into<String>,
        left_key_function: impl Into<String>,
        right_key_function: impl Into<String>,
        joiner: impl Into<String>,
    ) -> Self {
        Self {
            left,
            right,
            key_comparator: key_comparator.into(),
            left_key_function: left_key_function.into(),
            right_key_function: right_key_function.into(),
            joiner: joiner.into(),
            output: StreamId::new(),
        }
    }
}

struct JoinSide {
    input: StreamReceiver,
    key_function: KeyFn,
    head: Option<(Key, Item)>,
}

impl JoinSide {
    async fn advance(&mut self) -> DataflowResult<()> {
        self.head = match self.input.next().await? {
            Some(item) => Some(((self.key_function)(&item)?, item)),
            None => None,
        };
        Ok(())
    }

    /// Collect `first` and every following item whose key equals `key`.
    async fn take_group(&mut self, key: &Key, first: Item, comparator: &ComparatorFn) -> DataflowResult<Vec<Item>> {
        let mut items = vec![first];
        self.advance().await?;
        while let Some((next, _)) = &self.head {
            if comparator(key, next)? != Ordering::Equal {
                break;
            }
            if let Some((_, item)) = self.head.take() {
                items.push(item);
            }
            self.advance().await?;
        }
        Ok(items)
    }
}

struct SortedJoin {
    left: JoinSide,
    right: JoinSide,
    comparator: ComparatorFn,
    joiner: Arc<dyn ItemJoiner>,
}

impl SortedJoin {
    async fn run(&mut self, output: &StreamSender) -> DataflowResult<()> {
        self.left.advance().await?;
        self.right.advance().await?;
        let mut out = Vec::new();
        loop {
            let order = match (&self.left.head, &self.right.head) {
                (None, None) => break,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some((l, _)), Some((r, _))) => (self.comparator)(l, r)?,
            };
            match order {
                Ordering::Less => {
                    if let Some((key, item)) = self.left.head.take() {
                        self.joiner.on_left_join(&mut out, &key, item)?;
                    }
                    self.left.advance().await?;
                }
                Ordering::Greater => {
                    if let Some((key, item)) = self.right.head.take() {
                        self.joiner.on_right_join(&mut out, &key, item)?;
                    }
                    self.right.advance().await?;
                }
                Ordering::Equal => {
                    let (Some((key, left)), Some((_, right))) = (self.left.head.take(), self.right.head.take())
                    else {
                        break;
                    };
                    let lefts = self.left.take_group(&key, left, &self.comparator).await?;
                    let rights = self.right.take_group(&key, right, &self.comparator).await?;
                    self.joiner.on_inner_join(&mut out, &key, lefts, rights)?;
                }
            }
            output.send_all(out.drain(..)).await?;
        }
        Ok(())
    }
}

impl BindNode for NodeJoin {
    fn create_and_bind(&self, ctx: &mut TaskContext) -> DataflowResult<()> {
        let comparator = ctx.registry().comparator(&self.key_comparator)?;
        let left_key_function = ctx.registry().key_function(&self.left_key_function)?;
        let right_key_function = ctx.registry().key_function(&self.right_key_function)?;
        let joiner = ctx.registry().joiner(&self.joiner)?;
        let (name, metrics) = ctx.operator_metrics(Self::KIND);
        let mut join = SortedJoin {
            left: JoinSide {
                input: bind_input(ctx, self.left, &metrics),
                key_function: left_key_function,
                head: None,
            },
            right: JoinSide {
                input: bind_input(ctx, self.right, &metrics),
                key_function: right_key_function,
                head: None,
            },
            comparator,
            joiner,
        };
        let output = bind_output(ctx, self.output, &metrics);

        ctx.spawn_operator(name, metrics, async move {
            let result = join.run(&output).await;
            drop(join);
            output.close(&result).await;
            result
        });
        Ok(())
    }
}
