use crate::batch::{BatchRegistry, DrawBatchId};

/// The draw order across batches.
pub struct BatchOrder;

impl BatchOrder {
    /// Orders `present` batches: registry first-ordered (declaration order),
    /// then unordered batches as given, then registry last-ordered.
    ///
    /// Batches not in `present` are skipped.
    pub fn resolve(registry: &BatchRegistry, present: &[DrawBatchId]) -> Vec<DrawBatchId> {
        let mut out = Vec::with_capacity(present.len());
        out.extend(registry.first_ordered().iter().filter(|b| present.contains(b)));
        out.extend(present.iter().filter(|b| !registry.is_ordered(**b)));
        out.extend(registry.last_ordered().iter().filter(|b| present.contains(b)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{DrawBatch, ProgramId, Topology, VertexDataLayout};

    #[test]
    fn first_then_discovered_then_last() {
        let mut reg = BatchRegistry::new();
        let new_batch = |reg: &mut BatchRegistry| {
            reg.register(DrawBatch::new(
                "b",
                ProgramId(0),
                Topology::Triangles,
                VertexDataLayout::new([("p", wgpu::VertexFormat::Float32)]),
            ))
        };
        let a = new_batch(&mut reg);
        let b = new_batch(&mut reg);
        let c = new_batch(&mut reg);
        let d = new_batch(&mut reg);
        let unused = new_batch(&mut reg);
        reg.draw_first(a);
        reg.draw_last(d);
        reg.draw_last(unused);

        let order = BatchOrder::resolve(&reg, &[d, c, b, a]);
        assert_eq!(order, vec![a, c, b, d]);
    }
}
