//! Descriptor set allocation from a growing list of fixed-size pools.
use crate::{
    device::Device,
    error::{Error, Result},
    renderer::Renderer,
    serial::Serial,
    vk,
};
use tracing::debug;

/// A descriptor set and the pool generation it was allocated from.
///
/// The set is invalidated when its pool is reset; check with `DynamicDescriptorPool::is_valid`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DescriptorSetAllocation {
    pub set: vk::DescriptorSet,
    pool_index: usize,
    generation: u64,
}

#[derive(Debug)]
struct PoolEntry {
    pool: vk::DescriptorPool,
    allocated: u32,
    /// Serial of the last submission that used a set of this pool.
    serial: Serial,
    /// Used by recorded commands that have not been submitted yet.
    in_use: bool,
    generation: u64,
}

/// Allocates descriptor sets from pools of `max_sets` sets.
///
/// A full pool is reset and reused only after the last submission that used one of its sets
/// has completed; otherwise a new pool is created. Pools used since the last submission are
/// tagged by `release_in_flight_pools` once that submission is made.
#[derive(Debug)]
pub struct DynamicDescriptorPool {
    max_sets: u32,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    pools: Vec<PoolEntry>,
    current: usize,
}

impl DynamicDescriptorPool {
    /// `pool_sizes` gives the number of descriptors of each type *per set*.
    pub fn new(max_sets: u32, pool_sizes: &[vk::DescriptorPoolSize]) -> DynamicDescriptorPool {
        let pool_sizes = pool_sizes
            .iter()
            .map(|size| vk::DescriptorPoolSize {
                ty: size.ty,
                descriptor_count: size.descriptor_count * max_sets,
            })
            .collect();
        DynamicDescriptorPool {
            max_sets,
            pool_sizes,
            pools: vec![],
            current: 0,
        }
    }

    /// Allocates a set with the given layout. The pool is marked as used by the commands
    /// being recorded.
    pub fn allocate_set(
        &mut self,
        renderer: &Renderer,
        layout: vk::DescriptorSetLayout,
    ) -> Result<DescriptorSetAllocation> {
        let device = renderer.device();
        if self.pools.is_empty() {
            self.add_pool(device)?;
        }

        if self.pools[self.current].allocated >= self.max_sets {
            self.switch_pool(renderer)?;
        }

        let set = match device.allocate_descriptor_set(self.pools[self.current].pool, layout) {
            Ok(set) => set,
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) | Err(vk::Result::ERROR_FRAGMENTED_POOL) => {
                self.switch_pool(renderer)?;
                device.allocate_descriptor_set(self.pools[self.current].pool, layout)?
            }
            Err(err) => return Err(Error::from(err)),
        };

        let entry = &mut self.pools[self.current];
        entry.allocated += 1;
        entry.in_use = true;
        Ok(DescriptorSetAllocation {
            set,
            pool_index: self.current,
            generation: entry.generation,
        })
    }

    /// Returns whether the pool of `allocation` has not been reset since the allocation.
    pub fn is_valid(&self, allocation: &DescriptorSetAllocation) -> bool {
        self.pools
            .get(allocation.pool_index)
            .map_or(false, |entry| entry.generation == allocation.generation)
    }

    /// Records that `allocation` is used by the commands being recorded.
    pub fn retain(&mut self, allocation: &DescriptorSetAllocation) {
        if let Some(entry) = self.pools.get_mut(allocation.pool_index) {
            if entry.generation == allocation.generation {
                entry.in_use = true;
            }
        }
    }

    /// Tags the pools used since the last call with `serial`, the submission that carried the
    /// commands using them.
    pub fn release_in_flight_pools(&mut self, serial: Serial) {
        for entry in self.pools.iter_mut().filter(|entry| entry.in_use) {
            entry.serial = serial;
            entry.in_use = false;
        }
    }

    fn switch_pool(&mut self, renderer: &Renderer) -> Result<()> {
        let last_completed = renderer.last_completed_serial();
        let device = renderer.device();
        let reusable = self
            .pools
            .iter()
            .enumerate()
            .position(|(i, entry)| i != self.current && !entry.in_use && entry.serial <= last_completed);
        match reusable {
            Some(index) => {
                let entry = &mut self.pools[index];
                device.reset_descriptor_pool(entry.pool)?;
                entry.allocated = 0;
                entry.generation += 1;
                self.current = index;
                debug!(pool = ?entry.pool, "reusing descriptor pool");
            }
            None => self.add_pool(device)?,
        }
        Ok(())
    }

    fn add_pool(&mut self, device: &dyn Device) -> Result<()> {
        let pool = device.create_descriptor_pool(self.max_sets, &self.pool_sizes)?;
        self.pools.push(PoolEntry {
            pool,
            allocated: 0,
            serial: Serial::ZERO,
            in_use: false,
            generation: 0,
        });
        self.current = self.pools.len() - 1;
        Ok(())
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn destroy(&mut self, device: &dyn Device) {
        for entry in self.pools.drain(..) {
            device.destroy_descriptor_pool(entry.pool);
        }
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Config, DeviceLimits, Features},
        soft::SoftDevice,
    };
    use std::rc::Rc;

    #[test]
    fn full_pools_are_reused_only_after_completion() {
        let device = Rc::new(SoftDevice::default());
        let renderer = Renderer::new(
            device.clone(),
            DeviceLimits::default(),
            Features::default(),
            Config::default(),
        );
        let layout = device.create_descriptor_set_layout(&[]).unwrap();
        let mut pool = DynamicDescriptorPool::new(
            2,
            &[vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                descriptor_count: 1,
            }],
        );

        let a = pool.allocate_set(&renderer, layout).unwrap();
        pool.allocate_set(&renderer, layout).unwrap();
        // first pool is full and still in use
        pool.allocate_set(&renderer, layout).unwrap();
        assert_eq!(pool.pool_count(), 2);
        assert!(pool.is_valid(&a));

        pool.release_in_flight_pools(renderer.current_queue_serial());
        renderer.on_completed_serial(renderer.current_queue_serial());
        pool.allocate_set(&renderer, layout).unwrap();
        // second pool full, first one is complete: reset and reused
        pool.allocate_set(&renderer, layout).unwrap();
        assert_eq!(pool.pool_count(), 2);
        assert!(!pool.is_valid(&a));
    }

    #[test]
    fn pools_used_by_unsubmitted_commands_are_not_reset() {
        let device = Rc::new(SoftDevice::default());
        let renderer = Renderer::new(
            device.clone(),
            DeviceLimits::default(),
            Features::default(),
            Config::default(),
        );
        let layout = device.create_descriptor_set_layout(&[]).unwrap();
        let mut pool = DynamicDescriptorPool::new(
            1,
            &[vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                descriptor_count: 1,
            }],
        );

        let a = pool.allocate_set(&renderer, layout).unwrap();
        pool.allocate_set(&renderer, layout).unwrap();
        // a submission that does not carry these sets completes
        renderer.on_completed_serial(renderer.current_queue_serial());
        pool.allocate_set(&renderer, layout).unwrap();
        assert_eq!(pool.pool_count(), 3);
        assert!(pool.is_valid(&a));
    }
}
