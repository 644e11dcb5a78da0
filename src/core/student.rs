//! Student records, keyed by school id number.

use crate::{
    entities::{Student, student},
    errors::{Error, Result},
};
use sea_orm::{Set, prelude::*};

/// Finds the student with this school id number, creating them on first
/// use. An existing student's name and email are replaced with the ones
/// given, so the latest reservation always carries current contact details.
///
/// # Errors
/// Returns `Validation` for an empty name or id number, or a database error.
pub async fn resolve_or_create<C>(
    db: &C,
    full_name: &str,
    email: Option<&str>,
    student_number: &str,
) -> Result<student::Model>
where
    C: ConnectionTrait,
{
    let full_name = full_name.trim();
    let student_number = student_number.trim();
    let email = email.map(str::trim).filter(|e| !e.is_empty());
    if full_name.is_empty() {
        return Err(Error::Validation {
            message: "Student name is required".to_string(),
        });
    }
    if student_number.is_empty() {
        return Err(Error::Validation {
            message: "Student number is required".to_string(),
        });
    }

    let existing = Student::find()
        .filter(student::Column::StudentNumber.eq(student_number))
        .one(db)
        .await?;

    match existing {
        Some(found) => {
            if found.full_name == full_name && found.email.as_deref() == email {
                return Ok(found);
            }
            let mut model: student::ActiveModel = found.into();
            model.full_name = Set(full_name.to_string());
            model.email = Set(email.map(ToString::to_string));
            model.update(db).await.map_err(Into::into)
        }
        None => student::ActiveModel {
            full_name: Set(full_name.to_string()),
            email: Set(email.map(ToString::to_string)),
            student_number: Set(student_number.to_string()),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(Into::into),
    }
}

/// Retrieves a student by id.
///
/// # Errors
/// Returns `StudentNotFound` if the id is unknown.
pub async fn get_student<C>(db: &C, student_id: i64) -> Result<student::Model>
where
    C: ConnectionTrait,
{
    Student::find_by_id(student_id)
        .one(db)
        .await?
        .ok_or(Error::StudentNotFound { student_id })
}
