//! `vkQueueSubmit` rewriting.

use ash::vk;
use rtrace_protocol::command::{Command, CommandArgs, CommandId, ExternalMemoryData};
use rtrace_protocol::handle::Handle;
use rtrace_protocol::layout::BufferCopy;
use rtrace_protocol::observation::Range;
use tracing::{debug, warn};

use super::Mutator;
use crate::alloc::AllocResult;
use crate::cmd_builder::{self, StagingBuffer};
use crate::error::{ReplayError, Result};
use crate::observations;
use crate::state::{transitions, State, SubmitBatch};
use crate::transform::Writer;

/// Rewrites the submit infos of one `vkQueueSubmit`.
///
/// The submit infos can be read and replaced any number of times before
/// [`mutate`](Self::mutate), which mutates either the original command or a
/// single hijacked copy pointing at the replacement infos.
/// [`cleanup`](Self::cleanup) frees every allocation made along the way and
/// must be called once the rewrite is over, whether or not it succeeded.
pub struct SubmitRewriter<'c> {
    original: &'c Command,
    queue: Handle,
    submit_count: u32,
    p_submits: u64,
    fence: Handle,
    /// Decoded on first access.
    original_infos: Option<Vec<SubmitBatch>>,
    replacement: Option<Vec<SubmitBatch>>,
    hijacked: Option<Command>,
    allocs: Vec<AllocResult>,
    mutated: bool,
}

impl<'c> SubmitRewriter<'c> {
    pub fn new(original: &'c Command) -> Result<Self> {
        let CommandArgs::QueueSubmit { queue, submit_count, p_submits, fence } = original.args else {
            return Err(ReplayError::malformed(original.kind(), "not a queue submission"));
        };
        Ok(Self {
            original,
            queue,
            submit_count,
            p_submits,
            fence,
            original_infos: None,
            replacement: None,
            hijacked: None,
            allocs: Vec::new(),
            mutated: false,
        })
    }

    /// The current submit infos: the replacement if one was set, the
    /// original's otherwise.
    pub fn submit_infos(&mut self, state: &mut State) -> Result<&[SubmitBatch]> {
        if self.replacement.is_none() && self.original_infos.is_none() {
            observations::apply(&self.original.observations().reads, &mut state.memory, &state.store)?;
            self.original_infos = Some(transitions::read_submit_batches(state, self.p_submits, self.submit_count));
        }
        Ok(self
            .replacement
            .as_deref()
            .or(self.original_infos.as_deref())
            .unwrap_or_default())
    }

    pub fn set_submit_infos(&mut self, batches: Vec<SubmitBatch>) {
        self.replacement = Some(batches);
    }

    /// Free `alloc` during [`cleanup`](Self::cleanup).
    pub fn track(&mut self, alloc: AllocResult) {
        self.allocs.push(alloc);
    }

    pub fn is_hijacked(&self) -> bool {
        self.replacement.is_some()
    }

    /// The command that replaced the original, once [`mutate`](Self::mutate) built one.
    pub fn hijacked(&self) -> Option<&Command> {
        self.hijacked.as_ref()
    }

    pub fn tracked(&self) -> usize {
        self.allocs.len()
    }

    /// Mutate the submission. Only the first call has any effect.
    pub fn mutate(&mut self, m: &mut Mutator<'_>, id: CommandId) -> Result<()> {
        if self.mutated {
            debug!("{}: submission already mutated", id);
            return Ok(());
        }
        self.mutated = true;

        let Some(batches) = self.replacement.as_ref() else {
            return m.default_mutate(id, self.original);
        };
        let encoded = cmd_builder::encode_submit_batches(m.state, batches)?;
        let p_submits = encoded.first().map(|a| a.address()).unwrap_or_default();
        let mut hijacked = self.original.derive(CommandArgs::QueueSubmit {
            queue: self.queue,
            submit_count: batches.len() as u32,
            p_submits,
            fence: self.fence,
        });
        for a in encoded {
            hijacked.add_read(a.read_observation());
            self.allocs.push(a);
        }
        let result = m.default_mutate(id, &hijacked);
        self.hijacked = Some(hijacked);
        result
    }

    /// Free every tracked allocation, returning how many were freed.
    /// Later calls free nothing.
    pub fn cleanup(&mut self, state: &mut State) -> Result<usize> {
        state.free_all(self.allocs.drain(..))
    }
}

/// Submissions that consume externally written memory upload that memory
/// first, through a copy command buffer run at the start of the earliest
/// affected submit.
pub(super) fn queue_submit(m: &mut Mutator<'_>, id: CommandId, cmd: &Command) -> Result<()> {
    if !m.has_builder() || cmd.extras.external_memory.is_empty() {
        return m.default_mutate(id, cmd);
    }
    let mut rewriter = SubmitRewriter::new(cmd)?;
    let uploaded = upload_external_memory(m, id, &mut rewriter, &cmd.extras.external_memory);
    let freed = rewriter.cleanup(m.state);
    let upload = uploaded?;
    freed?;
    upload.release(m)
}

/// Objects kept alive until the rewritten submission has executed.
struct ExternalUpload {
    device: Handle,
    queue: Handle,
    pool: Handle,
    staging: StagingBuffer,
}

impl ExternalUpload {
    fn release(self, out: &mut dyn Writer) -> Result<()> {
        out.write_synth(cmd_builder::queue_wait_idle(self.queue))?;
        self.staging.destroy(out)?;
        out.write_synth(cmd_builder::destroy_command_pool(self.device, self.pool))?;
        Ok(())
    }
}

fn upload_external_memory(
    m: &mut Mutator<'_>,
    id: CommandId,
    rewriter: &mut SubmitRewriter<'_>,
    external: &[ExternalMemoryData],
) -> Result<ExternalUpload> {
    let queue = rewriter.queue;
    let device = m.state.queue(queue)?.device;
    let mut batches = rewriter.submit_infos(m.state)?.to_vec();
    if batches.is_empty() {
        return Err(ReplayError::malformed(rewriter.original.kind(), "external memory on an empty submission"));
    }

    let mut payload = Vec::new();
    let mut regions = Vec::with_capacity(external.len());
    for e in external {
        let data = m.state.store.get(&e.data).ok_or(ReplayError::UnresolvedObservation {
            range: Range::new(e.offset, e.size),
            id: e.data,
        })?;
        if data.len() as u64 != e.size {
            return Err(ReplayError::ObservationSizeMismatch {
                range: Range::new(e.offset, e.size),
                id: e.data,
                actual: data.len(),
            });
        }
        regions.push((e.buffer, BufferCopy { src_offset: payload.len() as u64, dst_offset: e.offset, size: e.size }));
        payload.extend_from_slice(&data);
    }
    debug!("{}: uploading {} bytes of external memory in {} regions", id, payload.len(), regions.len());

    let staging = StagingBuffer::upload(m, device, &payload)?;
    let family = m.state.queue(queue)?.family_index;
    let s = cmd_builder::create_command_pool(m.state, device, family)?;
    let pool = m.write_synth(s)?.unwrap_or_default();
    let s = cmd_builder::allocate_command_buffer(m.state, device, pool)?;
    let command_buffer = m.write_synth(s)?.unwrap_or_default();
    let s = cmd_builder::begin_command_buffer(m.state, command_buffer)?;
    m.write_synth(s)?;

    let mut targets: Vec<Handle> = Vec::new();
    for (buffer, region) in &regions {
        let s = cmd_builder::copy_buffer(m.state, command_buffer, staging.buffer, *buffer, std::slice::from_ref(region))?;
        m.write_synth(s)?;
        if !targets.contains(buffer) {
            targets.push(*buffer);
        }
    }
    for buffer in targets {
        let s = cmd_builder::buffer_barrier(
            m.state,
            command_buffer,
            buffer,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::MEMORY_READ,
        )?;
        m.write_synth(s)?;
    }
    m.write_synth(cmd_builder::end_command_buffer(command_buffer))?;

    let earliest = external.iter().map(|e| e.submit_index as usize).min().unwrap_or_default();
    let target = if earliest < batches.len() {
        earliest
    } else {
        warn!("{}: external memory targets submit {} of {}", id, earliest, batches.len());
        batches.len() - 1
    };
    batches[target].command_buffers.insert(0, command_buffer);
    rewriter.set_submit_infos(batches);
    rewriter.mutate(m, id)?;

    Ok(ExternalUpload { device, queue, pool, staging })
}
