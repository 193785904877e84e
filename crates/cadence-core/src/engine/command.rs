//! Lock-free transport commands and the audio-side processor
//!
//! The control thread pushes [`EngineCommand`]s into an `rtrb` ring; the
//! [`AudioProcessor`] owned by the device callback drains it at the start of
//! every block, so transport changes never land mid-block.
//!
//! Structural graph changes do not travel through this queue: they are
//! published as snapshots (see [`crate::plugin::chain`]).

use basedrop::Shared;

use super::graph::AudioGraph;
use crate::types::{Frames, Sample};

/// Default capacity of the command ring
pub const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Commands sent from the control thread to the audio thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    /// Start rolling from the current position
    Start,
    /// Stop rolling, keep the position
    Stop,
    /// Move the transport to a frame position
    Locate { frame: u64 },
}

/// Control-side end of the command queue
pub struct CommandSender {
    producer: rtrb::Producer<EngineCommand>,
}

impl CommandSender {
    /// Queue a command (non-blocking)
    ///
    /// Returns the command back if the queue is full.
    pub fn send(&mut self, cmd: EngineCommand) -> Result<(), EngineCommand> {
        self.producer.push(cmd).map_err(|e| match e {
            rtrb::PushError::Full(value) => value,
        })
    }

    /// Check if the queue has space for more commands
    pub fn has_space(&self) -> bool {
        self.producer.slots() > 0
    }
}

/// Audio-side owner of the graph and the command consumer
///
/// Moved into the device callback. Nothing in here allocates or blocks.
pub struct AudioProcessor {
    graph: Shared<AudioGraph>,
    commands: rtrb::Consumer<EngineCommand>,
}

/// Create a command queue bound to `graph`
pub fn command_channel(graph: Shared<AudioGraph>, capacity: usize) -> (CommandSender, AudioProcessor) {
    let (producer, consumer) = rtrb::RingBuffer::new(capacity.max(1));
    (
        CommandSender { producer },
        AudioProcessor {
            graph,
            commands: consumer,
        },
    )
}

impl AudioProcessor {
    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    /// A handle that outlives the processor (for the device owning it)
    pub fn graph_handle(&self) -> Shared<AudioGraph> {
        self.graph.clone()
    }

    /// Apply pending commands, render one block and hand the master to the driver
    pub fn process(&mut self, frames: Frames) {
        self.process_commands();
        self.graph.process(frames);
        for channel in self.graph.master().channels() {
            channel.take_data();
        }
    }

    fn process_commands(&mut self) {
        let transport = self.graph.transport();
        while let Ok(cmd) = self.commands.pop() {
            match cmd {
                EngineCommand::Start => transport.set_rolling(true),
                EngineCommand::Stop => transport.set_rolling(false),
                EngineCommand::Locate { frame } => transport.locate(frame),
            }
        }
    }

    /// Fill an interleaved device buffer from the master bus
    ///
    /// The buffer is rendered in chunks no larger than the graph block size.
    /// Device channels beyond the master bus width are silenced.
    pub fn process_interleaved(&mut self, data: &mut [Sample], channels: usize) {
        if channels == 0 {
            return;
        }
        let total_frames = data.len() / channels;
        let block = self.graph.block_size().max(1);
        let mut offset = 0;

        while offset < total_frames {
            let frames = block.min(total_frames - offset);
            self.process(frames);

            let out = &mut data[offset * channels..(offset + frames) * channels];
            out.fill(0.0);
            let master = self.graph.master();
            for ch in 0..channels.min(master.channel_count()) {
                let Some(buf) = master.get_buffer(ch, frames) else {
                    continue;
                };
                for (frame, sample) in out.chunks_mut(channels).zip(buf.iter()) {
                    frame[ch] = *sample;
                }
            }

            offset += frames;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gc::gc_handle;
    use crate::routing::{AudioBus, BusConfig};

    fn processor(capacity: usize) -> (CommandSender, AudioProcessor) {
        let master = Shared::new(&gc_handle(), AudioBus::new(BusConfig::software("Master", 2), 8));
        let graph = Shared::new(&gc_handle(), AudioGraph::new(master, 8));
        command_channel(graph, capacity)
    }

    #[test]
    fn test_commands_applied_at_block_start() {
        let (mut tx, mut rx) = processor(8);
        tx.send(EngineCommand::Locate { frame: 100 }).unwrap();
        tx.send(EngineCommand::Start).unwrap();
        rx.process(8);
        assert!(rx.graph().transport().is_rolling());
        assert_eq!(rx.graph().transport().position(), 108);

        tx.send(EngineCommand::Stop).unwrap();
        rx.process(8);
        assert!(!rx.graph().transport().is_rolling());
        assert_eq!(rx.graph().transport().position(), 108);
    }

    #[test]
    fn test_full_queue_returns_command() {
        let (mut tx, _rx) = processor(1);
        tx.send(EngineCommand::Start).unwrap();
        assert!(!tx.has_space());
        assert_eq!(tx.send(EngineCommand::Stop), Err(EngineCommand::Stop));
    }

    #[test]
    fn test_interleaved_output_chunks_blocks() {
        let (mut tx, mut rx) = processor(8);
        tx.send(EngineCommand::Start).unwrap();
        let mut data = vec![1.0; 20 * 3];
        rx.process_interleaved(&mut data, 3);
        // Master is silent with no tracks; 20 frames in blocks of 8
        assert!(data.iter().all(|s| *s == 0.0));
        assert_eq!(rx.graph().transport().position(), 20);
    }
}
