use crate::{device::Device, error::Result, vk};

/// A timestamp query slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueryHelper {
    pub pool: vk::QueryPool,
    pub index: u32,
}

/// Hands out timestamp queries from fixed-size query pools.
#[derive(Debug)]
pub struct DynamicQueryPool {
    pool_size: u32,
    pools: Vec<vk::QueryPool>,
    /// Next unused index in the last pool.
    next_index: u32,
    free: Vec<QueryHelper>,
}

impl DynamicQueryPool {
    pub fn new(pool_size: u32) -> DynamicQueryPool {
        DynamicQueryPool {
            pool_size: pool_size.max(1),
            pools: vec![],
            next_index: 0,
            free: vec![],
        }
    }

    pub fn allocate_query(&mut self, device: &dyn Device) -> Result<QueryHelper> {
        if let Some(query) = self.free.pop() {
            return Ok(query);
        }
        if self.pools.is_empty() || self.next_index >= self.pool_size {
            self.pools.push(device.create_query_pool(self.pool_size)?);
            self.next_index = 0;
        }
        let index = self.next_index;
        self.next_index += 1;
        Ok(QueryHelper {
            pool: *self.pools.last().unwrap_or(&vk::QueryPool::null()),
            index,
        })
    }

    /// Returns a query whose result has been read.
    pub fn free_query(&mut self, query: QueryHelper) {
        self.free.push(query);
    }

    pub fn destroy(&mut self, device: &dyn Device) {
        for pool in self.pools.drain(..) {
            device.destroy_query_pool(pool);
        }
        self.free.clear();
        self.next_index = 0;
    }
}
