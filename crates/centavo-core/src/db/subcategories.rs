//! Subcategory catalog

use rusqlite::{params, OptionalExtension, Row};

use super::Database;
use crate::error::Result;
use crate::models::Subcategory;

fn subcategory_from_row(row: &Row<'_>) -> rusqlite::Result<Subcategory> {
    Ok(Subcategory {
        id: row.get(0)?,
        category: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        keywords: row.get(4)?,
    })
}

const SUBCAT_COLS: &str = "id, category, name, description, keywords";

impl Database {
    pub fn create_subcategory(
        &self,
        category: &str,
        name: &str,
        description: Option<&str>,
        keywords: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO subcategory (category, name, description, keywords)
             VALUES (?, ?, ?, ?)",
            params![category, name, description, keywords],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_subcategory(&self, id: i64) -> Result<Option<Subcategory>> {
        let conn = self.conn()?;
        let subcat = conn
            .query_row(
                &format!("SELECT {} FROM subcategory WHERE id = ?", SUBCAT_COLS),
                params![id],
                subcategory_from_row,
            )
            .optional()?;
        Ok(subcat)
    }

    pub fn list_subcategories(&self) -> Result<Vec<Subcategory>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM subcategory ORDER BY category, name",
            SUBCAT_COLS
        ))?;
        let subcats = stmt
            .query_map([], subcategory_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(subcats)
    }

    /// Seed the default subcategory catalog. Idempotent.
    pub fn seed_subcategories(&self) -> Result<()> {
        let defaults: [(&str, &str, &str, &str); 12] = [
            (
                "Alimentación",
                "Supermercado",
                "Compras de supermercado y abarrotes",
                "automercado,walmart,mas x menos,pali,megasuper,super",
            ),
            (
                "Alimentación",
                "Restaurantes",
                "Restaurantes, sodas y comida rápida",
                "restaurante,soda,mcdonalds,kfc,subway,pizza,taco",
            ),
            (
                "Transporte",
                "Combustible",
                "Gasolineras",
                "gasolinera,servicentro,delta,uno,total",
            ),
            (
                "Transporte",
                "Viajes app",
                "Uber, DiDi y similares",
                "uber,didi,indriver",
            ),
            (
                "Hogar",
                "Servicios",
                "Electricidad, agua, internet",
                "ice,kolbi,cnfl,aya,cable,tigo,telecable",
            ),
            (
                "Entretenimiento",
                "Streaming",
                "Servicios de streaming",
                "netflix,spotify,disney,hbo,max,prime",
            ),
            ("Salud", "Farmacia", "Farmacias", "farmacia,fischel,sucre"),
            (
                "Salud",
                "Seguros",
                "Pólizas y seguros",
                "ins,seguro,poliza,póliza",
            ),
            (
                "Familia",
                "Apoyo familiar",
                "Transferencias de apoyo a familiares",
                "",
            ),
            ("Finanzas", "Comisiones", "Comisiones e intereses bancarios", "comision,interes"),
            ("Compras", "Tiendas", "Tiendas por departamento y en línea", "amazon,ebay,tienda,universal"),
            ("Otros", "Sin categorizar", "Pendiente de clasificación", ""),
        ];

        let conn = self.conn()?;
        for (category, name, description, keywords) in defaults {
            conn.execute(
                "INSERT OR IGNORE INTO subcategory (category, name, description, keywords)
                 VALUES (?, ?, ?, ?)",
                params![
                    category,
                    name,
                    description,
                    if keywords.is_empty() { None } else { Some(keywords) }
                ],
            )?;
        }
        Ok(())
    }

    /// The designated fallback subcategory for the cascade's last layer
    pub fn uncategorized_subcategory(&self) -> Result<Option<Subcategory>> {
        let conn = self.conn()?;
        let subcat = conn
            .query_row(
                &format!(
                    "SELECT {} FROM subcategory WHERE name = 'Sin categorizar'",
                    SUBCAT_COLS
                ),
                [],
                subcategory_from_row,
            )
            .optional()?;
        Ok(subcat)
    }
}
