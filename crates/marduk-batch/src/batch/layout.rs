/// One named vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub name: &'static str,
    pub format: wgpu::VertexFormat,
}

/// Ordered, tightly packed vertex attributes.
///
/// The stride is the sum of the attribute sizes; it drives allocation
/// alignment in the multi-draw builder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexDataLayout {
    attributes: Vec<VertexAttribute>,
    stride: u64,
}

impl VertexDataLayout {
    pub fn new(attributes: impl IntoIterator<Item = (&'static str, wgpu::VertexFormat)>) -> Self {
        let attributes: Vec<_> = attributes
            .into_iter()
            .map(|(name, format)| VertexAttribute { name, format })
            .collect();
        let stride = attributes.iter().map(|a| a.format.size()).sum();
        Self { attributes, stride }
    }

    #[inline]
    pub fn stride(&self) -> u64 {
        self.stride
    }

    #[inline]
    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    /// wgpu attribute descriptors with packed offsets, numbered from `first_location`.
    pub fn wgpu_attributes(&self, first_location: u32) -> Vec<wgpu::VertexAttribute> {
        let mut offset = 0;
        self.attributes
            .iter()
            .zip(first_location..)
            .map(|(a, shader_location)| {
                let attr = wgpu::VertexAttribute {
                    format: a.format,
                    offset,
                    shader_location,
                };
                offset += a.format.size();
                attr
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_is_sum_of_attribute_sizes() {
        let layout = VertexDataLayout::new([
            ("position", wgpu::VertexFormat::Float32x3),
            ("color", wgpu::VertexFormat::Unorm8x4),
            ("uv", wgpu::VertexFormat::Float32x2),
        ]);
        assert_eq!(layout.stride(), 24);

        let attrs = layout.wgpu_attributes(2);
        assert_eq!(attrs[1].offset, 12);
        assert_eq!(attrs[2].offset, 16);
        assert_eq!(attrs[2].shader_location, 4);
    }
}
