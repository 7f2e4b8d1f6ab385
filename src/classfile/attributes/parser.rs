use crate::{
    classfile::attributes::{
        Attribute, AttributeContext, AttributeFactory, AttributeList, AttributeSource,
    },
    file::io::read_be_at,
    Result,
};

/// Parser for an `attributes_count` prefixed attribute list.
///
/// Every record is `u2 attribute_name_index, u4 attribute_length, u1 info[length]`. The name is
/// resolved through the constant pool and the payload handed to the [`AttributeFactory`]
/// together with the [`AttributeContext`] the list appears in.
pub struct AttributeListParser<'a> {
    source: AttributeSource<'a>,
    context: AttributeContext,
    offset: usize,
    factory: &'a dyn AttributeFactory,
}

impl<'a> AttributeListParser<'a> {
    /// Create a parser for the list starting at `offset` (the `attributes_count` field).
    #[must_use]
    pub fn new(
        source: AttributeSource<'a>,
        context: AttributeContext,
        offset: usize,
        factory: &'a dyn AttributeFactory,
    ) -> Self {
        AttributeListParser {
            source,
            context,
            offset,
            factory,
        }
    }

    /// Parse the list, returning the attributes and the offset just past the last one.
    ///
    /// # Errors
    /// Returns [`crate::Error::Parse`] naming the failing `attributes[i]` entry.
    pub fn parse(&self) -> Result<(AttributeList, usize)> {
        let mut at = self.offset;
        let count = read_be_at::<u16>(self.source.data, &mut at)
            .map_err(|e| e.with_context("...while parsing attributes_count"))?;

        let mut attributes = Vec::with_capacity(usize::from(count));
        for i in 0..count {
            let attribute = self
                .parse_one(&mut at)
                .map_err(|e| e.with_context(format!("...while parsing attributes[{i}]")))?;
            attributes.push(attribute);
        }

        Ok((AttributeList::new(attributes), at))
    }

    fn parse_one(&self, at: &mut usize) -> Result<Attribute> {
        let name_index = read_be_at::<u16>(self.source.data, at)?;
        let length = read_be_at::<u32>(self.source.data, at)? as usize;
        let name = self.source.pool.utf8(name_index)?.clone();

        let offset = *at;
        let attribute = self
            .factory
            .parse(&self.source, self.context, &name, offset, length)?;
        *at = offset.checked_add(length).ok_or(out_of_bounds_error!())?;
        Ok(attribute)
    }
}
