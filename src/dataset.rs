//! Logical partitioned collections that compile into graph nodes.
//!
//! Every call to [`Dataset::channels`] installs fresh nodes and returns one
//! stream per partition.

use crate::error::{DataflowError, DataflowResult};
use crate::graph::{DataflowGraph, Partition};
use crate::node::{
    NodeConsumerToList, NodeDownload, NodeFilter, NodeJoin, NodeMap, NodeMerge, NodeReduceSimple, NodeShard,
    NodeSort, NodeSupplierOfIterable, NodeUpload, DEFAULT_SORT_MEMORY_LIMIT,
};
use crate::registry::ReducerRef;
use crate::stream_id::StreamId;

pub trait Dataset {
    /// Codec name of the items.
    fn value_type(&self) -> &str;

    fn channels(&self, graph: &mut DataflowGraph) -> DataflowResult<Vec<StreamId>>;
}

/// A dataset whose channels are each sorted by `key_function` under `key_comparator`.
pub trait SortedDataset: Dataset {
    fn key_function(&self) -> &str;

    fn key_comparator(&self) -> &str;
}

pub struct DatasetOfList {
    list_key: String,
    item_type: String,
}

/// One source per partition reading the environment list under `list_key`.
pub fn dataset_of_list(list_key: impl Into<String>, item_type: impl Into<String>) -> DatasetOfList {
    DatasetOfList {
        list_key: list_key.into(),
        item_type: item_type.into(),
    }
}

impl Dataset for DatasetOfList {
    fn value_type(&self) -> &str {
        &self.item_type
    }

    fn channels(&self, graph: &mut DataflowGraph) -> DataflowResult<Vec<StreamId>> {
        graph
            .partitions()
            .to_vec()
            .into_iter()
            .map(|partition| graph.add_node_stream(partition, NodeSupplierOfIterable::new(self.list_key.clone())))
            .collect()
    }
}

/// A dataset whose channels the caller vouches are sorted.
pub struct SortedCast<D> {
    input: D,
    key_function: String,
    key_comparator: String,
}

/// Treat every channel of `input` as already sorted by `key_function`.
pub fn cast_to_sorted<D: Dataset>(
    input: D,
    key_function: impl Into<String>,
    key_comparator: impl Into<String>,
) -> SortedCast<D> {
    SortedCast {
        input,
        key_function: key_function.into(),
        key_comparator: key_comparator.into(),
    }
}

impl<D: Dataset> Dataset for SortedCast<D> {
    fn value_type(&self) -> &str {
        self.input.value_type()
    }

    fn channels(&self, graph: &mut DataflowGraph) -> DataflowResult<Vec<StreamId>> {
        self.input.channels(graph)
    }
}

impl<D: Dataset> SortedDataset for SortedCast<D> {
    fn key_function(&self) -> &str {
        &self.key_function
    }

    fn key_comparator(&self) -> &str {
        &self.key_comparator
    }
}

pub type SortedDatasetOfList = SortedCast<DatasetOfList>;

/// Like [`dataset_of_list`], for lists already sorted on every partition.
pub fn sorted_dataset_of_list(
    list_key: impl Into<String>,
    item_type: impl Into<String>,
    key_function: impl Into<String>,
    key_comparator: impl Into<String>,
) -> SortedDatasetOfList {
    cast_to_sorted(dataset_of_list(list_key, item_type), key_function, key_comparator)
}

pub struct MapDataset<D> {
    input: D,
    mapper: String,
    result_type: String,
}

pub fn map<D: Dataset>(input: D, mapper: impl Into<String>, result_type: impl Into<String>) -> MapDataset<D> {
    MapDataset {
        input,
        mapper: mapper.into(),
        result_type: result_type.into(),
    }
}

impl<D: Dataset> Dataset for MapDataset<D> {
    fn value_type(&self) -> &str {
        &self.result_type
    }

    fn channels(&self, graph: &mut DataflowGraph) -> DataflowResult<Vec<StreamId>> {
        let mut channels = Vec::new();
        for input in self.input.channels(graph)? {
            let partition = graph.partition_of(input)?;
            channels.push(graph.add_node_stream(partition, NodeMap::new(self.mapper.clone(), input))?);
        }
        Ok(channels)
    }
}

pub struct FilterDataset<D> {
    input: D,
    predicate: String,
}

pub fn filter<D: Dataset>(input: D, predicate: impl Into<String>) -> FilterDataset<D> {
    FilterDataset {
        input,
        predicate: predicate.into(),
    }
}

impl<D: Dataset> Dataset for FilterDataset<D> {
    fn value_type(&self) -> &str {
        self.input.value_type()
    }

    fn channels(&self, graph: &mut DataflowGraph) -> DataflowResult<Vec<StreamId>> {
        let mut channels = Vec::new();
        for input in self.input.channels(graph)? {
            let partition = graph.partition_of(input)?;
            channels.push(graph.add_node_stream(partition, NodeFilter::new(self.predicate.clone(), input))?);
        }
        Ok(channels)
    }
}

pub struct LocalSortDataset<D> {
    input: D,
    key_function: String,
    key_comparator: String,
    memory_limit: usize,
}

/// Sort every channel on its own partition.
pub fn local_sort<D: Dataset>(
    input: D,
    key_function: impl Into<String>,
    key_comparator: impl Into<String>,
) -> LocalSortDataset<D> {
    LocalSortDataset {
        input,
        key_function: key_function.into(),
        key_comparator: key_comparator.into(),
        memory_limit: DEFAULT_SORT_MEMORY_LIMIT,
    }
}

impl<D> LocalSortDataset<D> {
    pub fn with_memory_limit(mut self, memory_limit: usize) -> Self {
        self.memory_limit = memory_limit;
        self
    }
}

impl<D: Dataset> Dataset for LocalSortDataset<D> {
    fn value_type(&self) -> &str {
        self.input.value_type()
    }

    fn channels(&self, graph: &mut DataflowGraph) -> DataflowResult<Vec<StreamId>> {
        let mut channels = Vec::new();
        for input in self.input.channels(graph)? {
            let partition = graph.partition_of(input)?;
            let sort = NodeSort::new(
                self.input.value_type(),
                self.key_function.clone(),
                self.key_comparator.clone(),
                input,
            )
            .with_memory_limit(self.memory_limit);
            channels.push(graph.add_node_stream(partition, sort)?);
        }
        Ok(channels)
    }
}

impl<D: Dataset> SortedDataset for LocalSortDataset<D> {
    fn key_function(&self) -> &str {
        &self.key_function
    }

    fn key_comparator(&self) -> &str {
        &self.key_comparator
    }
}

/// Shard every channel across all partitions of the graph.
///
/// Returns, per target partition, the local streams carrying its share. Data
/// crossing partitions travels through an Upload/Download pair.
fn shuffle(
    graph: &mut DataflowGraph,
    channels: Vec<StreamId>,
    item_type: &str,
    key_function: &str,
) -> DataflowResult<Vec<(Partition, Vec<StreamId>)>> {
    shuffle_with(graph, channels, key_function, item_type, |_, _, share| Ok(share))
}

/// [`shuffle`] with every share passed through `prepare` on its source
/// partition before it moves. `transfer_type` is the codec of what `prepare`
/// returns.
fn shuffle_with<F>(
    graph: &mut DataflowGraph,
    channels: Vec<StreamId>,
    key_function: &str,
    transfer_type: &str,
    mut prepare: F,
) -> DataflowResult<Vec<(Partition, Vec<StreamId>)>>
where
    F: FnMut(&mut DataflowGraph, Partition, StreamId) -> DataflowResult<StreamId>,
{
    let partitions = graph.partitions().to_vec();
    let mut targets: Vec<Vec<StreamId>> = vec![Vec::new(); partitions.len()];

    for channel in channels {
        let source = graph.partition_of(channel)?;
        let mut shard = NodeShard::new(key_function, channel);
        let outputs: Vec<StreamId> = partitions.iter().map(|_| shard.add_output()).collect();
        graph.add_node(source, shard);

        for ((target, output), streams) in partitions.iter().zip(outputs).zip(targets.iter_mut()) {
            let share = prepare(graph, source, output)?;
            if *target == source {
                streams.push(share);
            } else {
                graph.add_node(source, NodeUpload::new(transfer_type, share));
                let download = NodeDownload::new(transfer_type, source.address, share);
                streams.push(download.output);
                graph.add_node(*target, download);
            }
        }
    }
    Ok(partitions.into_iter().zip(targets).collect())
}

/// Shuffle a sorted dataset and merge every target's shares back into key order.
fn repartition_and_merge<S: SortedDataset>(graph: &mut DataflowGraph, input: &S) -> DataflowResult<Vec<StreamId>> {
    let inputs = input.channels(graph)?;
    let mut channels = Vec::new();
    for (target, streams) in shuffle(graph, inputs, input.value_type(), input.key_function())? {
        let mut merge = NodeMerge::new(input.key_function(), input.key_comparator(), false);
        for stream in streams {
            merge.add_input(stream);
        }
        channels.push(graph.add_node_stream(target, merge)?);
    }
    Ok(channels)
}

pub struct RepartitionSortDataset<S> {
    input: S,
}

/// Redistribute a locally sorted dataset by key hash and merge on each target.
pub fn repartition_sort<S: SortedDataset>(input: S) -> RepartitionSortDataset<S> {
    RepartitionSortDataset { input }
}

impl<S: SortedDataset> Dataset for RepartitionSortDataset<S> {
    fn value_type(&self) -> &str {
        self.input.value_type()
    }

    fn channels(&self, graph: &mut DataflowGraph) -> DataflowResult<Vec<StreamId>> {
        repartition_and_merge(graph, &self.input)
    }
}

impl<S: SortedDataset> SortedDataset for RepartitionSortDataset<S> {
    fn key_function(&self) -> &str {
        self.input.key_function()
    }

    fn key_comparator(&self) -> &str {
        self.input.key_comparator()
    }
}

pub struct ReduceDataset<S> {
    input: S,
    reducer: ReducerRef,
    result_type: String,
    result_key_function: String,
    repartition: bool,
}

/// Reduce every sorted channel on its own partition.
pub fn local_reduce<S: SortedDataset>(
    input: S,
    reducer: ReducerRef,
    result_type: impl Into<String>,
    result_key_function: impl Into<String>,
) -> ReduceDataset<S> {
    ReduceDataset {
        input,
        reducer,
        result_type: result_type.into(),
        result_key_function: result_key_function.into(),
        repartition: false,
    }
}

/// Shuffle a sorted dataset by key and reduce every key on one partition.
pub fn repartition_reduce<S: SortedDataset>(
    input: S,
    reducer: ReducerRef,
    result_type: impl Into<String>,
    result_key_function: impl Into<String>,
) -> ReduceDataset<S> {
    ReduceDataset {
        repartition: true,
        ..local_reduce(input, reducer, result_type, result_key_function)
    }
}

impl<S: SortedDataset> Dataset for ReduceDataset<S> {
    fn value_type(&self) -> &str {
        &self.result_type
    }

    fn channels(&self, graph: &mut DataflowGraph) -> DataflowResult<Vec<StreamId>> {
        let inputs = self.input.channels(graph)?;
        let groups = if self.repartition {
            shuffle(graph, inputs, self.input.value_type(), self.input.key_function())?
        } else {
            inputs
                .into_iter()
                .map(|input| Ok((graph.partition_of(input)?, vec![input])))
                .collect::<DataflowResult<Vec<_>>>()?
        };

        let mut channels = Vec::new();
        for (partition, streams) in groups {
            let mut reduce = NodeReduceSimple::new(
                self.input.key_function(),
                self.input.key_comparator(),
                self.reducer.clone(),
            );
            for stream in streams {
                reduce.add_input(stream);
            }
            channels.push(graph.add_node_stream(partition, reduce)?);
        }
        Ok(channels)
    }
}

impl<S: SortedDataset> SortedDataset for ReduceDataset<S> {
    fn key_function(&self) -> &str {
        &self.result_key_function
    }

    fn key_comparator(&self) -> &str {
        self.input.key_comparator()
    }
}

pub struct JoinDataset<L, R> {
    left: L,
    right: R,
    joiner: String,
    result_type: String,
    result_key_function: String,
}

/// Sort-merge join of two sorted datasets.
///
/// Both sides are repartitioned by key first, so matching keys meet on the
/// same partition whatever the inputs' placement. The comparator of `left`
/// orders both sides.
pub fn join<L: SortedDataset, R: SortedDataset>(
    left: L,
    right: R,
    joiner: impl Into<String>,
    result_type: impl Into<String>,
    result_key_function: impl Into<String>,
) -> JoinDataset<L, R> {
    JoinDataset {
        left,
        right,
        joiner: joiner.into(),
        result_type: result_type.into(),
        result_key_function: result_key_function.into(),
    }
}

impl<L: SortedDataset, R: SortedDataset> Dataset for JoinDataset<L, R> {
    fn value_type(&self) -> &str {
        &self.result_type
    }

    fn channels(&self, graph: &mut DataflowGraph) -> DataflowResult<Vec<StreamId>> {
        let lefts = repartition_and_merge(graph, &self.left)?;
        let rights = repartition_and_merge(graph, &self.right)?;
        let mut channels = Vec::with_capacity(lefts.len());
        for (left, right) in lefts.into_iter().zip(rights) {
            let partition = graph.partition_of(left)?;
            if graph.partition_of(right)? != partition {
                return Err(DataflowError::Binding(format!(
                    "join sides {} and {} live on different partitions",
                    left, right
                )));
            }
            let join = NodeJoin::new(
                left,
                right,
                self.left.key_comparator(),
                self.left.key_function(),
                self.right.key_function(),
                self.joiner.clone(),
            );
            channels.push(graph.add_node_stream(partition, join)?);
        }
        Ok(channels)
    }
}

impl<L: SortedDataset, R: SortedDataset> SortedDataset for JoinDataset<L, R> {
    fn key_function(&self) -> &str {
        &self.result_key_function
    }

    fn key_comparator(&self) -> &str {
        self.left.key_comparator()
    }
}

/// Key functions and codecs of a two-phase aggregation.
///
/// Items are reduced into accumulators on their own partition, accumulators
/// are shuffled by key, then combined and finished on the target.
#[derive(Debug, Clone)]
pub struct TwoPhaseReduce {
    /// Name of a reducer registered with `register_reducer_to_result`.
    pub reducer: String,
    pub input_key_function: String,
    pub key_comparator: String,
    pub accumulator_type: String,
    pub accumulator_key_function: String,
    pub output_type: String,
}

impl TwoPhaseReduce {
    fn input_to_accumulator(&self) -> ReducerRef {
        ReducerRef::InputToAccumulator {
            reducer: self.reducer.clone(),
        }
    }

    fn accumulator_to_output(&self) -> ReducerRef {
        ReducerRef::AccumulatorToOutput {
            reducer: self.reducer.clone(),
        }
    }

    /// Final reduce on `partition` over the accumulator streams that landed there.
    fn finish(
        &self,
        graph: &mut DataflowGraph,
        partition: Partition,
        streams: Vec<StreamId>,
    ) -> DataflowResult<StreamId> {
        let mut reduce = NodeReduceSimple::new(
            self.accumulator_key_function.clone(),
            self.key_comparator.clone(),
            self.accumulator_to_output(),
        );
        for stream in streams {
            reduce.add_input(stream);
        }
        graph.add_node_stream(partition, reduce)
    }
}

pub struct SortReduceRepartitionReduce<D> {
    input: D,
    plan: TwoPhaseReduce,
}

/// Sort and pre-aggregate every channel locally, then shuffle the
/// accumulators and finish each key on one partition.
pub fn sort_reduce_repartition_reduce<D: Dataset>(input: D, plan: TwoPhaseReduce) -> SortReduceRepartitionReduce<D> {
    SortReduceRepartitionReduce { input, plan }
}

impl<D: Dataset> Dataset for SortReduceRepartitionReduce<D> {
    fn value_type(&self) -> &str {
        &self.plan.output_type
    }

    fn channels(&self, graph: &mut DataflowGraph) -> DataflowResult<Vec<StreamId>> {
        let plan = &self.plan;
        let mut accumulators = Vec::new();
        for input in self.input.channels(graph)? {
            let partition = graph.partition_of(input)?;
            let sort = NodeSort::new(
                self.input.value_type(),
                plan.input_key_function.clone(),
                plan.key_comparator.clone(),
                input,
            );
            let sorted = graph.add_node_stream(partition, sort)?;
            let mut reduce = NodeReduceSimple::new(
                plan.input_key_function.clone(),
                plan.key_comparator.clone(),
                plan.input_to_accumulator(),
            );
            reduce.add_input(sorted);
            accumulators.push(graph.add_node_stream(partition, reduce)?);
        }

        let mut channels = Vec::new();
        for (target, streams) in shuffle(graph, accumulators, &plan.accumulator_type, &plan.accumulator_key_function)? {
            channels.push(plan.finish(graph, target, streams)?);
        }
        Ok(channels)
    }
}

pub struct SplitSortReduceRepartitionReduce<D> {
    input: D,
    plan: TwoPhaseReduce,
}

/// Like [`sort_reduce_repartition_reduce`], but every channel is split by key
/// first and each share is sorted and pre-aggregated on its own, so the
/// accumulators leave already grouped by target.
pub fn split_sort_reduce_repartition_reduce<D: Dataset>(
    input: D,
    plan: TwoPhaseReduce,
) -> SplitSortReduceRepartitionReduce<D> {
    SplitSortReduceRepartitionReduce { input, plan }
}

impl<D: Dataset> Dataset for SplitSortReduceRepartitionReduce<D> {
    fn value_type(&self) -> &str {
        &self.plan.output_type
    }

    fn channels(&self, graph: &mut DataflowGraph) -> DataflowResult<Vec<StreamId>> {
        let plan = &self.plan;
        let item_type = self.input.value_type();
        let inputs = self.input.channels(graph)?;
        let shares = shuffle_with(
            graph,
            inputs,
            &plan.input_key_function,
            &plan.accumulator_type,
            |graph, partition, share| {
                let sort = NodeSort::new(
                    item_type,
                    plan.input_key_function.clone(),
                    plan.key_comparator.clone(),
                    share,
                );
                let sorted = graph.add_node_stream(partition, sort)?;
                let mut reduce = NodeReduceSimple::new(
                    plan.input_key_function.clone(),
                    plan.key_comparator.clone(),
                    plan.input_to_accumulator(),
                );
                reduce.add_input(sorted);
                graph.add_node_stream(partition, reduce)
            },
        )?;

        let mut channels = Vec::new();
        for (target, streams) in shares {
            channels.push(plan.finish(graph, target, streams)?);
        }
        Ok(channels)
    }
}

/// Sends every channel of a dataset into the result list stored under
/// `list_key` on its own partition.
pub struct DatasetListConsumer<D> {
    input: D,
    list_key: String,
}

pub fn list_consumer<D: Dataset>(input: D, list_key: impl Into<String>) -> DatasetListConsumer<D> {
    DatasetListConsumer {
        input,
        list_key: list_key.into(),
    }
}

impl<D: Dataset> DatasetListConsumer<D> {
    pub fn compile_into(&self, graph: &mut DataflowGraph) -> DataflowResult<()> {
        for input in self.input.channels(graph)? {
            let partition = graph.partition_of(input)?;
            graph.add_node(partition, NodeConsumerToList::new(input, self.list_key.clone()));
        }
        Ok(())
    }
}
