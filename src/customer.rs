use serde::{Deserialize, Serialize, Serializer};
use sqlx::any::AnyRow;

use crate::{
    BatchError,
    item::rdbc::{RowMapper, column, numeric_column},
};

/// Source and output columns, in output order.
pub const CUSTOMER_COLUMNS: [&str; 13] = [
    "customerNumber",
    "customerName",
    "contactLastName",
    "contactFirstName",
    "phone",
    "addressLine1",
    "addressLine2",
    "city",
    "state",
    "postalCode",
    "country",
    "salesRepEmployeeNumber",
    "creditLimit",
];

/// Column the customers table is paged on.
pub const CUSTOMER_SORT_KEY: &str = "customerNumber";

pub const CUSTOMER_TABLE: &str = "customers";

/// Select list of the customer columns for the backend of `database_url`.
///
/// MySQL and Postgres store `creditLimit` as a fixed-point number, which the
/// generic driver does not decode, so it is selected as text there. Postgres
/// folds unquoted names to lower case, so every column is aliased back.
pub fn customer_select_clause(database_url: &str) -> String {
    let scheme = database_url
        .split(':')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    let columns: Vec<String> = match scheme.as_str() {
        "mysql" | "mariadb" => CUSTOMER_COLUMNS
            .iter()
            .map(|name| match *name {
                "creditLimit" => "CAST(creditLimit AS CHAR) AS creditLimit".to_string(),
                name => name.to_string(),
            })
            .collect(),
        "postgres" | "postgresql" => CUSTOMER_COLUMNS
            .iter()
            .map(|name| match *name {
                "creditLimit" => "creditLimit::text AS \"creditLimit\"".to_string(),
                name => format!("{} AS \"{}\"", name, name),
            })
            .collect(),
        _ => CUSTOMER_COLUMNS.iter().map(|name| name.to_string()).collect(),
    };
    columns.join(", ")
}

/// One row of the customers table.
///
/// Fields are declared in [`CUSTOMER_COLUMNS`] order, which is the order they
/// are serialized in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub customer_number: i64,
    pub customer_name: String,
    pub contact_last_name: String,
    pub contact_first_name: String,
    pub phone: String,
    pub address_line1: String,
    pub address_line2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: String,
    pub sales_rep_employee_number: Option<i64>,
    #[serde(serialize_with = "two_decimals")]
    pub credit_limit: f64,
}

fn two_decimals<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{:.2}", value))
}

/// Maps a customers row, selected with [`CUSTOMER_COLUMNS`], into a [`Customer`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CustomerRowMapper;

impl RowMapper<Customer> for CustomerRowMapper {
    fn map_row(&self, row: &AnyRow, row_num: usize) -> Result<Customer, BatchError> {
        Ok(Customer {
            customer_number: column(row, row_num, "customerNumber")?,
            customer_name: column(row, row_num, "customerName")?,
            contact_last_name: column(row, row_num, "contactLastName")?,
            contact_first_name: column(row, row_num, "contactFirstName")?,
            phone: column(row, row_num, "phone")?,
            address_line1: column(row, row_num, "addressLine1")?,
            address_line2: column(row, row_num, "addressLine2")?,
            city: column(row, row_num, "city")?,
            state: column(row, row_num, "state")?,
            postal_code: column(row, row_num, "postalCode")?,
            country: column(row, row_num, "country")?,
            sales_rep_employee_number: column(row, row_num, "salesRepEmployeeNumber")?,
            credit_limit: numeric_column(row, row_num, "creditLimit")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use crate::core::item::ItemWriter;
    use crate::item::csv::csv_writer::FlatFileItemWriterBuilder;

    use super::{CUSTOMER_COLUMNS, Customer, customer_select_clause};

    fn atelier() -> Customer {
        Customer {
            customer_number: 103,
            customer_name: "Atelier graphique".to_string(),
            contact_last_name: "Schmitt".to_string(),
            contact_first_name: "Carine ".to_string(),
            phone: "40.32.2555".to_string(),
            address_line1: "54 rue Royale".to_string(),
            address_line2: None,
            city: "Nantes".to_string(),
            state: None,
            postal_code: Some("44000".to_string()),
            country: "France".to_string(),
            sales_rep_employee_number: Some(1370),
            credit_limit: 21000.0,
        }
    }

    #[test]
    fn customer_should_serialize_in_column_order() -> Result<(), Box<dyn Error>> {
        let wtr = FlatFileItemWriterBuilder::new()
            .header(&CUSTOMER_COLUMNS)
            .from_writer(vec![]);

        ItemWriter::<Customer>::open(&wtr)?;
        wtr.write(&[atelier()])?;

        let data = String::from_utf8(wtr.into_inner()?)?;
        assert_eq!(
            data,
            "customerNumber,customerName,contactLastName,contactFirstName,phone,addressLine1,addressLine2,city,state,postalCode,country,salesRepEmployeeNumber,creditLimit\n\
             103,Atelier graphique,Schmitt,Carine ,40.32.2555,54 rue Royale,,Nantes,,44000,France,1370,21000.00\n"
        );

        Ok(())
    }

    #[test]
    fn serialized_output_should_read_back() -> Result<(), Box<dyn Error>> {
        let wtr = FlatFileItemWriterBuilder::new()
            .header(&CUSTOMER_COLUMNS)
            .from_writer(vec![]);
        ItemWriter::<Customer>::open(&wtr)?;
        wtr.write(&[atelier()])?;
        let data = wtr.into_inner()?;

        let mut reader = csv::Reader::from_reader(data.as_slice());
        let customers: Vec<Customer> = reader.deserialize().collect::<Result<_, _>>()?;

        assert_eq!(customers, vec![atelier()]);
        Ok(())
    }

    #[test]
    fn sqlite_should_select_the_bare_columns() {
        assert_eq!(
            customer_select_clause("sqlite://customers.db"),
            CUSTOMER_COLUMNS.join(", ")
        );
    }

    #[test]
    fn mysql_should_read_credit_limit_as_text() {
        for url in ["mysql://root@localhost/classicmodels", "MariaDB://db/classicmodels"] {
            let select = customer_select_clause(url);
            assert!(select.starts_with("customerNumber, customerName, "), "{select}");
            assert!(
                select.ends_with(", salesRepEmployeeNumber, CAST(creditLimit AS CHAR) AS creditLimit"),
                "{select}"
            );
        }
    }

    #[test]
    fn postgres_should_alias_columns_and_read_credit_limit_as_text() {
        let select = customer_select_clause("postgres://localhost/classicmodels");

        assert!(
            select.starts_with("customerNumber AS \"customerNumber\", customerName AS \"customerName\""),
            "{select}"
        );
        assert!(select.ends_with(", creditLimit::text AS \"creditLimit\""), "{select}");
        assert_eq!(select.matches(" AS ").count(), CUSTOMER_COLUMNS.len());
    }
}
