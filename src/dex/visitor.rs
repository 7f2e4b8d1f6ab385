//! Walking the defined classes of a dex session.
//!
//! The walk mirrors the structure of the image: every class is offered to the visitor, which
//! decides whether to descend into its fields and methods; every method may in turn request
//! its decoded body. The visitor can stop the walk after any member or any class.

use crate::{
    dex::{
        classdef::{ClassDef, EncodedField, EncodedMethod},
        code::MethodBody,
        session::DexParser,
    },
    Error, Result,
};

/// Which members of a class the walk should descend into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descend {
    /// Skip the members of this class
    Skip,
    /// Visit fields only
    Fields,
    /// Visit methods only
    Methods,
    /// Visit fields, then methods
    All,
}

impl Descend {
    fn fields(self) -> bool {
        matches!(self, Descend::Fields | Descend::All)
    }

    fn methods(self) -> bool {
        matches!(self, Descend::Methods | Descend::All)
    }
}

/// Callbacks for [`DexParser::visit_defined_classes`].
///
/// Every method has a default so visitors only implement the levels they care about.
pub trait DexVisitor {
    /// Called once per class definition, in file order.
    fn visit_class(&mut self, _class: &ClassDef) -> Descend {
        Descend::Skip
    }

    /// Called for every static, then instance field of a class.
    fn visit_field(&mut self, _class: &ClassDef, _field: &EncodedField) {}

    /// Called for every direct, then virtual method of a class.
    ///
    /// Returning `true` requests [`DexVisitor::visit_method_body`] for methods with code.
    fn visit_method(&mut self, _class: &ClassDef, _method: &EncodedMethod) -> bool {
        false
    }

    /// Called with the decoded body of a method that requested it.
    fn visit_method_body(&mut self, _method: &EncodedMethod, _body: &MethodBody) {}

    /// Checked after every field and method; `true` leaves the current class.
    fn stop_members(&self) -> bool {
        false
    }

    /// Checked after every class; `true` ends the walk.
    fn stop(&self) -> bool {
        false
    }
}

impl DexParser {
    /// Walk every defined class, offering fields, methods and bodies to `visitor`.
    ///
    /// # Errors
    /// Returns [`crate::Error::SessionClosed`] if the session has been closed, before or
    /// during the walk.
    pub fn visit_defined_classes(&self, visitor: &mut dyn DexVisitor) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }

        for class in self.class_defs() {
            let descend = visitor.visit_class(class);

            if descend.fields() {
                for field in class.fields() {
                    visitor.visit_field(class, field);
                    if visitor.stop_members() {
                        break;
                    }
                }
            }

            if descend.methods() {
                for method in class.methods() {
                    if visitor.visit_method(class, method) && method.code.is_some() {
                        let body = method.body()?;
                        visitor.visit_method_body(method, body);
                    }
                    if visitor.stop_members() {
                        break;
                    }
                }
            }

            if visitor.stop() {
                break;
            }
        }

        Ok(())
    }
}
