//! Secondary command buffers recorded between two submissions.
use crate::{
    device::{Device, RenderPassBegin, RenderPassInheritance},
    error::Result,
    vk,
};

/// A secondary command buffer and where it executes in the primary.
#[derive(Copy, Clone, Debug)]
pub enum CommandNode {
    /// Executed inside a render pass instance.
    RenderPass {
        begin: RenderPassBegin,
        commands: vk::CommandBuffer,
    },
    /// Executed outside of any render pass (dispatches, queries, events).
    Outside { commands: vk::CommandBuffer },
}

impl CommandNode {
    pub fn commands(&self) -> vk::CommandBuffer {
        match *self {
            CommandNode::RenderPass { commands, .. } => commands,
            CommandNode::Outside { commands } => commands,
        }
    }
}

/// Ordered list of the secondary command buffers of the next submission.
///
/// Secondaries are allocated from the transient pool of the submission and are freed with it.
#[derive(Debug, Default)]
pub struct CommandGraph {
    nodes: Vec<CommandNode>,
}

impl CommandGraph {
    pub fn new() -> CommandGraph {
        Default::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[CommandNode] {
        &self.nodes
    }

    /// Starts a secondary command buffer that executes inside a new render pass instance.
    pub fn begin_render_pass_node(
        &mut self,
        device: &dyn Device,
        pool: vk::CommandPool,
        begin: RenderPassBegin,
    ) -> Result<vk::CommandBuffer> {
        let commands = device.allocate_command_buffer(pool, vk::CommandBufferLevel::SECONDARY)?;
        device.begin_command_buffer(
            commands,
            Some(&RenderPassInheritance {
                render_pass: begin.render_pass,
                subpass: 0,
                framebuffer: begin.framebuffer,
            }),
        )?;
        self.nodes.push(CommandNode::RenderPass { begin, commands });
        Ok(commands)
    }

    /// Starts a secondary command buffer that executes outside of render passes.
    pub fn begin_outside_node(&mut self, device: &dyn Device, pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
        let commands = device.allocate_command_buffer(pool, vk::CommandBufferLevel::SECONDARY)?;
        device.begin_command_buffer(commands, None)?;
        self.nodes.push(CommandNode::Outside { commands });
        Ok(commands)
    }

    /// Ends every secondary and records their execution into `primary`, which must be in the
    /// recording state. The graph is empty afterwards.
    pub fn record(&mut self, device: &dyn Device, primary: vk::CommandBuffer) -> Result<()> {
        for node in self.nodes.drain(..) {
            device.end_command_buffer(node.commands())?;
            match node {
                CommandNode::RenderPass { begin, commands } => {
                    device.cmd_begin_render_pass(primary, &begin);
                    device.cmd_execute_commands(primary, &[commands]);
                    device.cmd_end_render_pass(primary);
                }
                CommandNode::Outside { commands } => {
                    device.cmd_execute_commands(primary, &[commands]);
                }
            }
        }
        Ok(())
    }

    /// Begins `primary`, records the graph into it and ends it.
    pub fn submit_commands(&mut self, device: &dyn Device, primary: vk::CommandBuffer) -> Result<()> {
        device.begin_command_buffer(primary, None)?;
        self.record(device, primary)?;
        device.end_command_buffer(primary)?;
        Ok(())
    }

    /// Drops every node without recording it.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::SubmitInfo,
        soft::{SoftCommand, SoftDevice},
    };

    #[test]
    fn render_pass_nodes_are_wrapped_in_begin_end() {
        let device = SoftDevice::default();
        let pool = device.create_command_pool(true).unwrap();
        let primary = device
            .allocate_command_buffer(pool, vk::CommandBufferLevel::PRIMARY)
            .unwrap();
        let begin = RenderPassBegin {
            render_pass: vk::RenderPass::null(),
            framebuffer: vk::Framebuffer::null(),
            render_area: Default::default(),
        };

        let mut graph = CommandGraph::new();
        let outside = graph.begin_outside_node(&device, pool).unwrap();
        device.cmd_dispatch(outside, 1, 1, 1);
        let inside = graph.begin_render_pass_node(&device, pool, begin).unwrap();
        device.cmd_draw(inside, 3, 1, 0, 0);
        graph.submit_commands(&device, primary).unwrap();
        assert!(graph.is_empty());

        device
            .queue_submit(
                &SubmitInfo {
                    command_buffers: &[primary],
                    ..Default::default()
                },
                vk::Fence::null(),
            )
            .unwrap();
        assert_eq!(
            device.submitted_commands(),
            vec![
                SoftCommand::Dispatch(1, 1, 1),
                SoftCommand::BeginRenderPass(begin),
                SoftCommand::Draw {
                    vertex_count: 3,
                    instance_count: 1,
                    first_vertex: 0,
                    first_instance: 0
                },
                SoftCommand::EndRenderPass,
            ]
        );
    }
}
